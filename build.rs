// swrend/build.rs
//
//! The `swrend` build script.

use cfg_aliases::cfg_aliases;
use gl_generator::{Api, Fallbacks, Profile, Registry, StructGenerator};
use std::env;
use std::fs::File;
use std::path::PathBuf;

fn main() {
    // Setup aliases for #[cfg] checks
    cfg_aliases! {
        android: { target_os = "android" },
        linux: { all(unix, not(any(target_os = "macos", target_os = "ios", android))) },
        egl_backend: { any(linux, android) },
    }

    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap();
    let target_family = env::var("CARGO_CFG_TARGET_FAMILY").ok();
    let dest = PathBuf::from(&env::var("OUT_DIR").unwrap());

    // Generate EGL bindings. They are loaded at runtime, so nothing links against libEGL.
    let is_unix = target_family.as_ref().map_or(false, |f| f == "unix");
    if target_os == "android" || (is_unix && target_os != "macos" && target_os != "ios") {
        let mut file = File::create(dest.join("egl_bindings.rs")).unwrap();
        let registry = Registry::new(Api::Egl, (1, 5), Profile::Core, Fallbacks::All, []);
        registry.write_bindings(StructGenerator, &mut file).unwrap();
    }
}
