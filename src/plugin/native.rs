//! Native provider modules
//!
//! Providers shipped as dynamic libraries (.so, .dylib, .dll) speak a small
//! JSON-in/JSON-out C ABI:
//!
//! ```c
//! const char* provider_contract(void);                 // "novel-source/1" | "novel-exporter/1"
//! int provider_invoke(const char* method, const char* params, char** result);
//! void provider_free(char* result);                   // optional
//! ```
//!
//! A result of `null` encodes "not found". Results are released with
//! `provider_free` when the library exports it, `libc::free` otherwise.
//!
//! Exported functions must not unwind. A panic escaping a C-ABI function
//! aborts the host, so modules written in Rust catch their own panics and
//! report them through a non-zero return code.

use super::boundary::ModuleBoundary;
use super::exporter::NovelExporter;
use super::source::{Category, Chapter, Novel, NovelSource, Paged};
use crate::core::error::{HubError, Result};
use async_trait::async_trait;
use base64::Engine as _;
use libloading::{Library, Symbol};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const CONTRACT_SYMBOL: &[u8] = b"provider_contract";
const INVOKE_SYMBOL: &[u8] = b"provider_invoke";
const FREE_SYMBOL: &[u8] = b"provider_free";

type ContractFn = unsafe extern "C" fn() -> *const c_char;
type InvokeFn = unsafe extern "C" fn(*const c_char, *const c_char, *mut *mut c_char) -> i32;
type FreeFn = unsafe extern "C" fn(*mut c_char);

/// Library extension for the current platform
pub fn library_extension() -> &'static str {
    std::env::consts::DLL_EXTENSION
}

/// Whether `path` looks like a loadable library on this platform
pub fn is_library_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |ext| ext.eq_ignore_ascii_case(library_extension()))
}

/// An opened dynamic library. Unmapped on drop.
pub struct NativeLibrary {
    provider: String,
    path: PathBuf,
    library: Library,
}

impl std::fmt::Debug for NativeLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeLibrary")
            .field("provider", &self.provider)
            .field("path", &self.path)
            .finish()
    }
}

impl NativeLibrary {
    /// Open a provider library with its own symbol namespace
    ///
    /// Providers are trusted code; opening one runs its initializers.
    pub fn open(provider: &str, path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(HubError::ModuleLoadFailed {
                provider: provider.to_string(),
                reason: format!("module file not found: {}", path.display()),
            });
        }

        if !is_library_file(path) {
            return Err(HubError::ModuleLoadFailed {
                provider: provider.to_string(),
                reason: format!(
                    "{} is not a .{} library",
                    path.display(),
                    library_extension()
                ),
            });
        }

        let library = open_private(path).map_err(|e| HubError::ModuleLoadFailed {
            provider: provider.to_string(),
            reason: format!("failed to open {}: {}", path.display(), e),
        })?;

        tracing::info!(provider = %provider, path = ?path, "Native module opened");

        Ok(Self {
            provider: provider.to_string(),
            path: path.to_path_buf(),
            library,
        })
    }

    /// Contract declared by the module, `None` when the symbol is missing
    pub fn contract(&self) -> Option<String> {
        let symbol: Symbol<ContractFn> = unsafe { self.library.get(CONTRACT_SYMBOL).ok()? };

        let ptr = unsafe { symbol() };
        if ptr.is_null() {
            return None;
        }

        let contract = unsafe { CStr::from_ptr(ptr) };
        Some(contract.to_string_lossy().into_owned())
    }

    pub fn has_invoke(&self) -> bool {
        unsafe { self.library.get::<InvokeFn>(INVOKE_SYMBOL).is_ok() }
    }

    /// Call `provider_invoke` synchronously. Run it on the blocking pool.
    pub fn invoke(&self, method: &str, params: &Value) -> Result<Value> {
        let fail = |message: String| HubError::provider_failed(&self.provider, method, message);

        let method_cstr = CString::new(method).map_err(|e| fail(format!("invalid method name: {}", e)))?;
        let params_cstr = CString::new(serde_json::to_string(params)?)
            .map_err(|e| fail(format!("invalid parameters: {}", e)))?;

        let invoke: Symbol<InvokeFn> = unsafe {
            self.library
                .get(INVOKE_SYMBOL)
                .map_err(|e| fail(format!("symbol 'provider_invoke' missing: {}", e)))?
        };

        let mut result_ptr: *mut c_char = std::ptr::null_mut();

        let return_code = unsafe { invoke(method_cstr.as_ptr(), params_cstr.as_ptr(), &mut result_ptr) };

        if result_ptr.is_null() {
            if return_code != 0 {
                return Err(fail(format!("returned error code {}", return_code)));
            }
            return Err(fail("returned a null result".to_string()));
        }

        // Copy out before releasing the provider's buffer
        let text = unsafe { CStr::from_ptr(result_ptr) }.to_string_lossy().into_owned();
        self.release(result_ptr);

        if return_code != 0 {
            tracing::warn!(
                provider = %self.provider,
                method = method,
                return_code = return_code,
                "Native module returned error code"
            );
            return Err(fail(format!("error code {}: {}", return_code, text)));
        }

        serde_json::from_str(&text).map_err(|e| fail(format!("malformed result JSON: {}", e)))
    }

    fn release(&self, ptr: *mut c_char) {
        match unsafe { self.library.get::<FreeFn>(FREE_SYMBOL) } {
            Ok(free_fn) => unsafe { free_fn(ptr) },
            // Same allocator is assumed when the module exports no free function
            Err(_) => unsafe { libc::free(ptr as *mut libc::c_void) },
        }
    }
}

impl Drop for NativeLibrary {
    fn drop(&mut self) {
        tracing::debug!(provider = %self.provider, path = ?self.path, "Native module unmapped");
    }
}

#[cfg(unix)]
fn open_private(path: &Path) -> std::result::Result<Library, libloading::Error> {
    use libloading::os::unix::{Library as UnixLibrary, RTLD_LOCAL, RTLD_NOW};
    let library = unsafe { UnixLibrary::open(Some(path), RTLD_NOW | RTLD_LOCAL)? };
    Ok(library.into())
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::result::Result<Library, libloading::Error> {
    unsafe { Library::new(path) }
}

/// Run a JSON call on the blocking pool and decode the reply
async fn call<T>(boundary: &Arc<ModuleBoundary>, method: &'static str, params: Value) -> Result<T>
where
    T: DeserializeOwned,
{
    let provider = boundary.provider().to_string();
    let owned = Arc::clone(boundary);

    let value = tokio::task::spawn_blocking(move || owned.library()?.invoke(method, &params))
        .await
        .map_err(|e| HubError::TaskError(format!("Native call task failed: {}", e)))??;

    serde_json::from_value(value)
        .map_err(|e| HubError::provider_failed(provider, method, format!("unexpected result shape: {}", e)))
}

/// [`NovelSource`] backed by a native module
pub struct NativeSource {
    boundary: Arc<ModuleBoundary>,
}

impl NativeSource {
    pub fn new(boundary: Arc<ModuleBoundary>) -> Self {
        Self { boundary }
    }
}

#[async_trait]
impl NovelSource for NativeSource {
    async fn search(&self, query: &str, page: u32) -> Result<Paged<Novel>> {
        call(&self.boundary, "search", json!({ "query": query, "page": page })).await
    }

    async fn quick_search(&self, query: &str, page: u32) -> Result<Paged<Novel>> {
        call(&self.boundary, "quick_search", json!({ "query": query, "page": page })).await
    }

    async fn list_hot(&self, page: u32) -> Result<Paged<Novel>> {
        call(&self.boundary, "list_hot", json!({ "page": page })).await
    }

    async fn list_latest(&self, page: u32) -> Result<Paged<Novel>> {
        call(&self.boundary, "list_latest", json!({ "page": page })).await
    }

    async fn list_completed(&self, page: u32) -> Result<Paged<Novel>> {
        call(&self.boundary, "list_completed", json!({ "page": page })).await
    }

    async fn list_by_author(&self, author_slug: &str, page: u32) -> Result<Paged<Novel>> {
        call(
            &self.boundary,
            "list_by_author",
            json!({ "author_slug": author_slug, "page": page }),
        )
        .await
    }

    async fn list_by_category(&self, category_slug: &str, page: u32) -> Result<Paged<Novel>> {
        call(
            &self.boundary,
            "list_by_category",
            json!({ "category_slug": category_slug, "page": page }),
        )
        .await
    }

    async fn list_categories(&self) -> Result<Vec<Category>> {
        call(&self.boundary, "list_categories", json!({})).await
    }

    async fn detail(&self, slug: &str) -> Result<Option<Novel>> {
        call(&self.boundary, "detail", json!({ "slug": slug })).await
    }

    async fn list_chapters(&self, slug: &str, novel_id: Option<&str>) -> Result<Vec<Chapter>> {
        call(
            &self.boundary,
            "list_chapters",
            json!({ "slug": slug, "novel_id": novel_id }),
        )
        .await
    }

    async fn chapter_content(&self, novel_slug: &str, chapter_slug: &str) -> Result<Option<Chapter>> {
        call(
            &self.boundary,
            "chapter_content",
            json!({ "novel_slug": novel_slug, "chapter_slug": chapter_slug }),
        )
        .await
    }

    async fn locate_chapter_by_number(
        &self,
        slug: &str,
        novel_id: Option<&str>,
        number: u32,
    ) -> Result<Option<Chapter>> {
        call(
            &self.boundary,
            "locate_chapter_by_number",
            json!({ "slug": slug, "novel_id": novel_id, "number": number }),
        )
        .await
    }
}

/// Reply of a native `export` call
#[derive(Debug, Deserialize)]
struct ExportReply {
    /// Base64 of the produced file
    data: String,
    #[serde(default)]
    extension: Option<String>,
}

/// [`NovelExporter`] backed by a native module
pub struct NativeExporter {
    boundary: Arc<ModuleBoundary>,
    file_extension: String,
}

impl NativeExporter {
    pub fn new(boundary: Arc<ModuleBoundary>, file_extension: String) -> Self {
        Self {
            boundary,
            file_extension,
        }
    }
}

#[async_trait]
impl NovelExporter for NativeExporter {
    fn file_extension(&self) -> &str {
        &self.file_extension
    }

    async fn export(
        &self,
        novel: &Novel,
        chapters: &[Chapter],
        output: &mut (dyn std::io::Write + Send),
    ) -> Result<String> {
        let reply: ExportReply = call(
            &self.boundary,
            "export",
            json!({ "novel": novel, "chapters": chapters }),
        )
        .await?;

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(reply.data.as_bytes())
            .map_err(|e| {
                HubError::provider_failed(self.boundary.provider(), "export", format!("invalid base64: {}", e))
            })?;

        output.write_all(&bytes)?;
        output.flush()?;

        Ok(reply.extension.unwrap_or_else(|| self.file_extension.clone()))
    }
}
