//! Native source provider used by the fiction_hub tests
//!
//! Knows a single novel, "Tao Tac". Results are JSON strings owned by this
//! library until the host hands them back to `provider_free`.

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::sync::atomic::{AtomicI32, Ordering};

#[cfg(not(feature = "unknown-contract"))]
const CONTRACT: &[u8] = b"novel-source/1\0";
#[cfg(feature = "unknown-contract")]
const CONTRACT: &[u8] = b"novel-reader/9\0";

const NOVEL: &str = r#"{"title":"Tao Tac","slug":"tao-tac","authors":[{"name":"X"}],"source":"native"}"#;

/// Results handed out and not yet freed
static OUTSTANDING: AtomicI32 = AtomicI32::new(0);

#[cfg(not(feature = "no-contract"))]
#[no_mangle]
pub extern "C" fn provider_contract() -> *const c_char {
    CONTRACT.as_ptr() as *const c_char
}

/// # Safety
/// `method` and `params` must be valid C strings and `result` a valid out pointer.
#[no_mangle]
pub unsafe extern "C" fn provider_invoke(method: *const c_char, params: *const c_char, result: *mut *mut c_char) -> c_int {
    if method.is_null() || params.is_null() || result.is_null() {
        return 1;
    }
    let method = CStr::from_ptr(method).to_string_lossy().into_owned();
    let params = CStr::from_ptr(params).to_string_lossy().into_owned();

    // Never unwind into the host
    let reply = std::panic::catch_unwind(|| dispatch(&method, &params));
    let (code, text) = match reply {
        Ok(Ok(text)) => (0, text),
        Ok(Err(message)) => (2, message),
        Err(_) => (3, "provider panicked".to_string()),
    };

    *result = allocate(text);
    code
}

fn dispatch(method: &str, params: &str) -> Result<String, String> {
    match method {
        "search" | "quick_search" => {
            let items = if params.contains("Tao Tac") { NOVEL } else { "" };
            Ok(format!(r#"{{"items":[{}],"total_pages":1}}"#, items))
        }
        "detail" => Ok(if params.contains(r#""slug":"tao-tac""#) {
            NOVEL.to_string()
        } else {
            "null".to_string()
        }),
        "list_categories" => Ok(r#"[{"name":"Tien Hiep","slug":"tien-hiep"}]"#.to_string()),
        "explode" => panic!("requested panic"),
        other => Err(format!("unsupported method {}", other)),
    }
}

#[cfg(not(feature = "malloc-results"))]
fn allocate(text: String) -> *mut c_char {
    let owned = CString::new(text).unwrap_or_default();
    OUTSTANDING.fetch_add(1, Ordering::SeqCst);
    owned.into_raw()
}

#[cfg(feature = "malloc-results")]
fn allocate(text: String) -> *mut c_char {
    extern "C" {
        fn malloc(size: usize) -> *mut std::os::raw::c_void;
    }
    let bytes = text.as_bytes();
    unsafe {
        let ptr = malloc(bytes.len() + 1) as *mut u8;
        if ptr.is_null() {
            return std::ptr::null_mut();
        }
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, bytes.len());
        *ptr.add(bytes.len()) = 0;
        ptr as *mut c_char
    }
}

/// # Safety
/// `ptr` must come from `provider_invoke` and be freed once.
#[cfg(not(feature = "malloc-results"))]
#[no_mangle]
pub unsafe extern "C" fn provider_free(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
        OUTSTANDING.fetch_sub(1, Ordering::SeqCst);
    }
}

#[no_mangle]
pub extern "C" fn fixture_outstanding_results() -> c_int {
    OUTSTANDING.load(Ordering::SeqCst)
}
