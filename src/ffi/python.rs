// In: src/ffi/python.rs

use std::path::PathBuf;
use std::sync::Arc;

use log::LevelFilter;
use pyo3::prelude::*;
use pyo3::types::{PyBool, PyBytes, PyDict, PyFloat, PyList, PyLong, PyString, PyTuple};

use crate::error::BridgeError;
use crate::host::{HostException, HostFunction, HostObject, HostRuntime, HostValue};
use crate::module::{HostCreator, ModuleContext};
use crate::observability::init_logging;
use crate::reader::{Archive, EntryRange, Query, Search, Searcher, SuggestionSearch, SuggestionSearcher};
use crate::writer::blob::{self, Blob};
use crate::writer::provider;

//==================================================================================
// I. Value conversion
//==================================================================================

/// Python method names and the host names the engine looks for.
const METHODS: &[(&str, &str)] = &[
    ("get_path", "getPath"),
    ("get_title", "getTitle"),
    ("get_mimetype", "getMimeType"),
    ("get_hints", "getHints"),
    ("get_indexdata", "getIndexData"),
    ("get_contentprovider", "getContentProvider"),
    ("feed", "feed"),
];

/// Plain attributes copied as-is.
const ATTRIBUTES: &[(&str, &str)] = &[
    ("path", "path"),
    ("title", "title"),
    ("mimetype", "mimeType"),
    ("content", "content"),
    ("size", "size"),
];

/// Converts a Python value for the host. Must run on the host thread.
///
/// Arbitrary Python objects become host objects whose methods call back into
/// Python; `get_size()` is read once, eagerly, into `size`.
pub fn py_to_host(obj: &Bound<'_, PyAny>) -> PyResult<HostValue> {
    if obj.is_none() {
        return Ok(HostValue::Null);
    }
    if let Ok(b) = obj.downcast::<PyBool>() {
        return Ok(HostValue::Bool(b.is_true()));
    }
    if obj.is_instance_of::<PyLong>() {
        return Ok(HostValue::BigInt(obj.extract::<i128>()?));
    }
    if let Ok(f) = obj.downcast::<PyFloat>() {
        return Ok(HostValue::Number(f.value()));
    }
    if let Ok(s) = obj.downcast::<PyString>() {
        return Ok(HostValue::String(s.to_str()?.to_string()));
    }
    if let Ok(b) = obj.downcast::<PyBytes>() {
        return Ok(HostValue::Bytes(b.as_bytes().to_vec()));
    }
    if let Ok(b) = obj.downcast::<PyBlob>() {
        return Ok(HostValue::Object(blob::to_host(&b.borrow().inner)));
    }
    if let Ok(p) = obj.downcast::<PyContentProvider>() {
        return Ok(HostValue::Object(p.borrow().host.clone()));
    }
    if let Ok(list) = obj.downcast::<PyList>() {
        return list.iter().map(|v| py_to_host(&v)).collect::<PyResult<_>>().map(HostValue::Array);
    }
    if let Ok(tuple) = obj.downcast::<PyTuple>() {
        return tuple.iter().map(|v| py_to_host(&v)).collect::<PyResult<_>>().map(HostValue::Array);
    }
    if let Ok(dict) = obj.downcast::<PyDict>() {
        let host = HostObject::new();
        for (key, value) in dict.iter() {
            host.set(key.str()?.to_str()?.to_string(), py_to_host(&value)?);
        }
        return Ok(HostValue::Object(host));
    }
    if obj.is_callable() {
        return Ok(HostValue::Function(py_callable(obj.clone().unbind())));
    }

    let host = HostObject::new();
    for (py_name, host_name) in METHODS {
        if obj.hasattr(*py_name)? {
            let method = obj.getattr(*py_name)?;
            host.set(*host_name, py_callable(method.unbind()));
        }
    }
    for (py_name, host_name) in ATTRIBUTES {
        if obj.hasattr(*py_name)? {
            let value = obj.getattr(*py_name)?;
            if !value.is_callable() {
                host.set(*host_name, py_to_host(&value)?);
            }
        }
    }
    if !host.has("size") && obj.hasattr("get_size")? {
        host.set("size", py_to_host(&obj.call_method0("get_size")?)?);
    }
    Ok(HostValue::Object(host))
}

pub fn host_to_py(py: Python<'_>, value: &HostValue) -> PyResult<PyObject> {
    Ok(match value {
        HostValue::Undefined | HostValue::Null | HostValue::Function(_) => py.None(),
        HostValue::Bool(b) => (*b).into_py(py),
        HostValue::Number(n) => (*n).into_py(py),
        HostValue::BigInt(n) => (*n).into_py(py),
        HostValue::String(s) => s.as_str().into_py(py),
        HostValue::Bytes(b) => PyBytes::new_bound(py, b).into_py(py),
        HostValue::Array(items) => {
            let items = items
                .iter()
                .map(|v| host_to_py(py, v))
                .collect::<PyResult<Vec<_>>>()?;
            PyList::new_bound(py, items).into_py(py)
        }
        HostValue::Object(obj) => match blob::from_host(value) {
            Some(inner) => Py::new(py, PyBlob { inner })?.into_py(py),
            None => {
                let dict = PyDict::new_bound(py);
                for key in obj.keys() {
                    let prop = obj.get(&key);
                    if prop.as_function().is_none() {
                        dict.set_item(key, host_to_py(py, &prop)?)?;
                    }
                }
                dict.into_py(py)
            }
        },
    })
}

fn py_callable(func: Py<PyAny>) -> HostFunction {
    HostFunction::new(move |args| {
        Python::with_gil(|py| {
            let args = args
                .iter()
                .map(|a| host_to_py(py, a))
                .collect::<PyResult<Vec<_>>>()?;
            let out = func.bind(py).call1(PyTuple::new_bound(py, args))?;
            py_to_host(&out)
        })
        .map_err(|e: PyErr| HostException::new(e.to_string()))
    })
}

//==================================================================================
// II. Blob & providers
//==================================================================================

#[pyclass(name = "Blob", module = "zim_bridge")]
#[derive(Clone)]
pub struct PyBlob {
    inner: Blob,
}

#[pymethods]
impl PyBlob {
    #[new]
    #[pyo3(signature = (content = None))]
    fn new(content: Option<&Bound<'_, PyAny>>) -> PyResult<Self> {
        let inner = match content {
            None => Blob::empty(),
            Some(c) => match c.downcast::<PyBytes>() {
                Ok(bytes) => Blob::from(bytes.as_bytes()),
                Err(_) => Blob::from(c.str()?.to_str()?),
            },
        };
        Ok(Self { inner })
    }

    #[getter]
    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn __len__(&self) -> usize {
        self.inner.len()
    }

    fn __bytes__<'py>(&self, py: Python<'py>) -> Bound<'py, PyBytes> {
        PyBytes::new_bound(py, self.inner.as_bytes())
    }

    fn __str__(&self) -> String {
        self.inner.to_string()
    }
}

/// A native provider owned by a host object, moved into the engine on use.
#[pyclass(name = "ContentProvider", module = "zim_bridge", unsendable)]
pub struct PyContentProvider {
    host: HostObject,
}

#[pymethods]
impl PyContentProvider {
    fn get_size(&self) -> PyResult<u64> {
        Ok(self.host.get("size").to_u64_lossless()?)
    }

    fn feed(&self) -> PyResult<PyBlob> {
        let chunk = self.host.call_method("feed", &[]).map_err(BridgeError::from)?;
        let inner = blob::from_host(&chunk).ok_or_else(|| {
            BridgeError::unexpected("ContentProvider.feed", "a Blob", chunk.type_name())
        })?;
        Ok(PyBlob { inner })
    }
}

#[pyfunction]
#[pyo3(name = "StringProvider")]
pub fn string_provider_py(content: &Bound<'_, PyAny>) -> PyResult<PyContentProvider> {
    let content = py_to_host(content)?;
    Ok(PyContentProvider {
        host: provider::host_string_provider(&content),
    })
}

#[pyfunction]
#[pyo3(name = "FileProvider")]
pub fn file_provider_py(path: &str) -> PyResult<PyContentProvider> {
    Ok(PyContentProvider {
        host: provider::host_file_provider(&HostValue::from(path))?,
    })
}

//==================================================================================
// III. Creator & archive
//==================================================================================

/// Field order is drop order: the creator and module go before the runtime.
#[pyclass(name = "Creator", module = "zim_bridge", unsendable)]
pub struct PyCreator {
    creator: HostCreator,
    module: ModuleContext,
    runtime: HostRuntime,
    filename: Option<PathBuf>,
}

#[pymethods]
impl PyCreator {
    #[new]
    #[pyo3(signature = (filename = None))]
    fn new(filename: Option<PathBuf>) -> PyResult<Self> {
        let runtime = HostRuntime::new("python");
        let module = ModuleContext::init(&runtime)?;
        let creator = module.new_creator();
        Ok(Self {
            creator,
            module,
            runtime,
            filename,
        })
    }

    fn config_verbose(&self, verbose: bool) -> PyResult<()> {
        self.creator.config_verbose(&HostValue::Bool(verbose))?;
        Ok(())
    }

    fn config_compression(&self, compression: &str) -> PyResult<()> {
        self.creator.config_compression(&HostValue::from(compression))?;
        Ok(())
    }

    fn config_clustersize(&self, size: u64) -> PyResult<()> {
        self.creator
            .config_cluster_size(&HostValue::BigInt(i128::from(size)))?;
        Ok(())
    }

    #[pyo3(signature = (indexing, language = "eng"))]
    fn config_indexing(&self, indexing: bool, language: &str) -> PyResult<()> {
        self.creator
            .config_indexing(&HostValue::Bool(indexing), &HostValue::from(language))?;
        Ok(())
    }

    fn config_nbworkers(&self, nb_workers: u32) -> PyResult<()> {
        self.creator
            .config_nb_workers(&HostValue::Number(f64::from(nb_workers)))?;
        Ok(())
    }

    fn start(&self) -> PyResult<()> {
        let path = match &self.filename {
            Some(p) => HostValue::String(p.display().to_string()),
            None => HostValue::Null,
        };
        Ok(self.creator.start_zim_creation(&path)?)
    }

    fn __enter__(slf: PyRef<'_, Self>) -> PyResult<PyRef<'_, Self>> {
        slf.start()?;
        Ok(slf)
    }

    fn __exit__(
        &self,
        exc_type: &Bound<'_, PyAny>,
        _exc_value: &Bound<'_, PyAny>,
        _traceback: &Bound<'_, PyAny>,
    ) -> PyResult<bool> {
        if exc_type.is_none() {
            self.finish()?;
        }
        Ok(false)
    }

    fn add_item(&self, item: &Bound<'_, PyAny>) -> PyResult<()> {
        Ok(self.creator.add_item(&py_to_host(item)?)?)
    }

    #[pyo3(signature = (name, content, mimetype = None))]
    fn add_metadata(
        &self,
        name: &str,
        content: &Bound<'_, PyAny>,
        mimetype: Option<&str>,
    ) -> PyResult<()> {
        Ok(self
            .creator
            .add_metadata(name, &py_to_host(content)?, mimetype)?)
    }

    fn add_illustration(&self, size: u32, content: &Bound<'_, PyAny>) -> PyResult<()> {
        Ok(self
            .creator
            .add_illustration(&HostValue::from(size), &py_to_host(content)?)?)
    }

    #[pyo3(signature = (path, title, target, hints = None))]
    fn add_redirection(
        &self,
        path: &str,
        title: &str,
        target: &str,
        hints: Option<&Bound<'_, PyAny>>,
    ) -> PyResult<()> {
        let hints = match hints {
            Some(h) => py_to_host(h)?,
            None => HostValue::Undefined,
        };
        Ok(self.creator.add_redirection(path, title, target, &hints)?)
    }

    fn set_mainpath(&self, path: &str) -> PyResult<()> {
        Ok(self.creator.set_main_path(path)?)
    }

    fn set_uuid(&self, uuid: &[u8]) -> PyResult<()> {
        Ok(self.creator.set_uuid(&HostValue::Bytes(uuid.to_vec()))?)
    }

    fn finish(&self) -> PyResult<PyArchive> {
        let archive = self.creator.finish_zim_creation()?;
        log::info!(
            "[{}] archive finished ({} live proxies)",
            self.runtime.name(),
            self.module.registry().len()
        );
        Ok(PyArchive {
            inner: Arc::clone(archive.archive()),
        })
    }
}

#[pyclass(name = "Archive", module = "zim_bridge")]
pub struct PyArchive {
    inner: Arc<Archive>,
}

#[pymethods]
impl PyArchive {
    #[new]
    fn open(filename: PathBuf) -> PyResult<Self> {
        Ok(Self {
            inner: Arc::new(Archive::open(filename)?),
        })
    }

    #[getter]
    fn entry_count(&self) -> usize {
        self.inner.entry_count()
    }

    #[getter]
    fn uuid(&self) -> String {
        self.inner.uuid_string()
    }

    #[getter]
    fn has_main_entry(&self) -> bool {
        self.inner.has_main_entry()
    }

    #[getter]
    fn metadata_keys(&self) -> Vec<String> {
        self.inner.metadata_keys()
    }

    fn get_metadata(&self, name: &str) -> PyResult<String> {
        Ok(self.inner.get_metadata(name)?)
    }

    fn has_entry_by_path(&self, path: &str) -> bool {
        self.inner.has_entry_by_path(path)
    }

    /// Content of the item at `path`, following redirects.
    fn get_content(&self, path: &str) -> PyResult<PyBlob> {
        let entry = self.inner.get_entry_by_path(path)?;
        let item = self.inner.get_item(&entry, true)?;
        Ok(PyBlob { inner: item.data() })
    }

    #[getter]
    fn has_title_index(&self) -> bool {
        self.inner.has_title_index()
    }

    #[getter]
    fn has_fulltext_index(&self) -> bool {
        self.inner.has_fulltext_index()
    }

    /// Path of a random entry with content.
    fn get_random_entry(&self) -> PyResult<String> {
        Ok(self.inner.get_random_entry()?.path().to_string())
    }

    #[pyo3(signature = (start = 0, max_results = None))]
    fn iter_by_path(&self, start: usize, max_results: Option<usize>) -> Vec<String> {
        window(self.inner.iter_by_path(), start, max_results)
    }

    #[pyo3(signature = (start = 0, max_results = None))]
    fn iter_by_title(&self, start: usize, max_results: Option<usize>) -> Vec<String> {
        window(self.inner.iter_by_title(), start, max_results)
    }

    #[pyo3(signature = (start = 0, max_results = None))]
    fn iter_efficient(&self, start: usize, max_results: Option<usize>) -> Vec<String> {
        window(self.inner.iter_efficient(), start, max_results)
    }

    fn find_by_path(&self, prefix: &str) -> Vec<String> {
        self.inner.find_by_path(prefix).paths()
    }

    fn find_by_title(&self, prefix: &str) -> Vec<String> {
        self.inner.find_by_title(prefix).paths()
    }
}

/// Entry paths of `range`, optionally paged.
fn window(range: EntryRange, start: usize, max_results: Option<usize>) -> Vec<String> {
    range.offset(start, max_results.unwrap_or(usize::MAX)).paths()
}

//==================================================================================
// IV. Search
//==================================================================================

#[pyclass(name = "Searcher", module = "zim_bridge")]
pub struct PySearcher {
    inner: Searcher,
}

#[pymethods]
impl PySearcher {
    /// Takes one archive or a list of archives.
    #[new]
    fn new(archives: &Bound<'_, PyAny>) -> PyResult<Self> {
        let archives: Vec<Arc<Archive>> = match archives.downcast::<PyArchive>() {
            Ok(one) => vec![Arc::clone(&one.borrow().inner)],
            Err(_) => archives
                .extract::<Vec<PyRef<'_, PyArchive>>>()?
                .iter()
                .map(|a| Arc::clone(&a.inner))
                .collect(),
        };
        Ok(Self {
            inner: Searcher::from_archives(archives)?,
        })
    }

    fn add_archive(&mut self, archive: PyRef<'_, PyArchive>) {
        self.inner.add_archive(Arc::clone(&archive.inner));
    }

    fn set_verbose(&mut self, verbose: bool) {
        self.inner.set_verbose(verbose);
    }

    /// `georange` is `(latitude, longitude, distance_in_metres)`.
    #[pyo3(signature = (query, georange = None))]
    fn search(&self, query: &str, georange: Option<(f64, f64, f64)>) -> PyResult<PySearch> {
        let mut query = Query::new(query);
        if let Some((latitude, longitude, distance)) = georange {
            query.set_georange(latitude, longitude, distance);
        }
        Ok(PySearch {
            inner: self.inner.search(&query)?,
        })
    }
}

#[pyclass(name = "Search", module = "zim_bridge")]
pub struct PySearch {
    inner: Search,
}

#[pymethods]
impl PySearch {
    #[getter]
    fn estimated_matches(&self) -> usize {
        self.inner.get_estimated_matches()
    }

    /// Each hit as a dict of `path`, `title`, `score`, `snippet`,
    /// `word_count`, `file_index` and `zim_id`.
    fn get_results<'py>(
        &self,
        py: Python<'py>,
        start: usize,
        max_results: usize,
    ) -> PyResult<Vec<Bound<'py, PyDict>>> {
        self.inner
            .get_results(start, max_results)
            .iter()
            .map(|hit| {
                let dict = PyDict::new_bound(py);
                dict.set_item("path", hit.path())?;
                dict.set_item("title", hit.title())?;
                dict.set_item("score", hit.score())?;
                dict.set_item("snippet", hit.snippet())?;
                dict.set_item("word_count", hit.word_count())?;
                dict.set_item("file_index", hit.file_index())?;
                dict.set_item("zim_id", hit.zim_id())?;
                Ok(dict)
            })
            .collect()
    }
}

#[pyclass(name = "SuggestionSearcher", module = "zim_bridge")]
pub struct PySuggestionSearcher {
    inner: SuggestionSearcher,
}

#[pymethods]
impl PySuggestionSearcher {
    #[new]
    fn new(archive: PyRef<'_, PyArchive>) -> Self {
        Self {
            inner: SuggestionSearcher::new(Arc::clone(&archive.inner)),
        }
    }

    fn set_verbose(&mut self, verbose: bool) {
        self.inner.set_verbose(verbose);
    }

    fn suggest(&self, text: &str) -> PySuggestionSearch {
        PySuggestionSearch {
            inner: self.inner.suggest(text),
        }
    }
}

#[pyclass(name = "SuggestionSearch", module = "zim_bridge")]
pub struct PySuggestionSearch {
    inner: SuggestionSearch,
}

#[pymethods]
impl PySuggestionSearch {
    #[getter]
    fn estimated_matches(&self) -> usize {
        self.inner.get_estimated_matches()
    }

    /// Each suggestion as a dict of `path`, `title` and `snippet`.
    fn get_results<'py>(
        &self,
        py: Python<'py>,
        start: usize,
        max_results: usize,
    ) -> PyResult<Vec<Bound<'py, PyDict>>> {
        self.inner
            .get_results(start, max_results)
            .iter()
            .map(|hit| {
                let dict = PyDict::new_bound(py);
                dict.set_item("path", hit.path())?;
                dict.set_item("title", hit.title())?;
                dict.set_item("snippet", hit.snippet())?;
                Ok(dict)
            })
            .collect()
    }
}

//==================================================================================
// V. Logging
//==================================================================================

#[pyfunction]
#[pyo3(name = "enable_verbose_logging", signature = (log_file = None))]
pub fn enable_verbose_logging_py(log_file: Option<PathBuf>) -> PyResult<()> {
    Ok(init_logging(LevelFilter::Info, log_file.as_deref())?)
}
