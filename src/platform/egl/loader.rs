// swrend/src/platform/egl/loader.rs
//
//! Runtime loading of the EGL and OpenGL ES libraries.

use crate::egl::Egl;

use libc::{dlopen, dlsym, RTLD_LAZY};
use std::ffi::{CStr, CString};
use std::os::raw::c_void;
use std::ptr;
use std::sync::LazyLock;

thread_local! {
    pub(crate) static EGL_FUNCTIONS: Egl = Egl::load_with(get_proc_address);
}

static EGL_LIBRARY: LazyLock<Option<LibraryWrapper>> =
    LazyLock::new(|| open_library(&[c"libEGL.so.1", c"libEGL.so"]));

static GLES_LIBRARY: LazyLock<Option<LibraryWrapper>> =
    LazyLock::new(|| open_library(&[c"libGLESv2.so.2", c"libGLESv2.so"]));

struct LibraryWrapper(*mut c_void);

unsafe impl Send for LibraryWrapper {}
unsafe impl Sync for LibraryWrapper {}

fn open_library(sonames: &[&CStr]) -> Option<LibraryWrapper> {
    for soname in sonames {
        unsafe {
            let handle = dlopen(soname.as_ptr(), RTLD_LAZY);
            if !handle.is_null() {
                return Some(LibraryWrapper(handle));
            }
        }
    }
    None
}

fn lookup(library: &Option<LibraryWrapper>, symbol_name: &str) -> *const c_void {
    let (library, symbol_name) = match (library, CString::new(symbol_name)) {
        (Some(library), Ok(symbol_name)) => (library, symbol_name),
        _ => return ptr::null(),
    };
    unsafe { dlsym(library.0, symbol_name.as_ptr()).cast_const() }
}

fn get_proc_address(symbol_name: &str) -> *const c_void {
    lookup(&EGL_LIBRARY, symbol_name)
}

/// Returns true if `libEGL` could be opened.
pub(crate) fn egl_library_loaded() -> bool {
    EGL_LIBRARY.is_some()
}

/// Resolves an OpenGL ES entry point, from `libGLESv2` if present and through
/// `eglGetProcAddress` otherwise.
pub(crate) fn get_gl_proc_address(symbol_name: &str) -> *const c_void {
    let symbol = lookup(&GLES_LIBRARY, symbol_name);
    if !symbol.is_null() {
        return symbol;
    }
    let symbol_name = match CString::new(symbol_name) {
        Ok(symbol_name) => symbol_name,
        Err(_) => return ptr::null(),
    };
    EGL_FUNCTIONS.with(|egl| unsafe { egl.GetProcAddress(symbol_name.as_ptr()) as *const c_void })
}
