use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use libloading::Library;
use parking_lot::Mutex;
use plughost_core::{
    PLUG_IN_REGISTER_SYMBOL, PLUGHOST_API_VERSION, PlugInDeclaration, RegisterFn,
};
use serde::Deserialize;
use tracing::{debug, trace};

use crate::error::{HostError, HostResult};

/// Loads the plug-in declarations of one code unit into a context.
pub trait UnitLoader: Send + Sync {
    fn load(&self, context: &LoadContext, path: &Path) -> HostResult<Vec<PlugInDeclaration>>;
}

/// Isolated set of libraries belonging to one package.
pub struct LoadContext {
    name: String,
    root: Option<PathBuf>,
    loader: Arc<dyn UnitLoader>,
    units: Mutex<HashMap<PathBuf, Vec<PlugInDeclaration>>>,
    libraries: Mutex<Vec<Library>>,
    unloading: AtomicBool,
}

impl LoadContext {
    pub fn new(
        name: impl Into<String>,
        root: Option<PathBuf>,
        loader: Arc<dyn UnitLoader>,
    ) -> Self {
        Self {
            name: name.into(),
            root,
            loader,
            units: Mutex::new(HashMap::new()),
            libraries: Mutex::new(Vec::new()),
            unloading: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Package directory, if the context was created for one.
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn is_unloading(&self) -> bool {
        self.unloading.load(Ordering::Acquire)
    }

    /// Loads the code unit at `path`, reusing it if this context already has.
    pub fn load_unit(self: &Arc<Self>, path: &Path) -> HostResult<CodeUnit> {
        if self.is_unloading() {
            return Err(HostError::LoadContextUnloading(self.name.clone()));
        }

        // held across the load so concurrent starts open a unit once
        let mut units = self.units.lock();
        let declarations = match units.get(path) {
            Some(declarations) => {
                trace!(context = %self.name, path = %path.display(), "Reusing loaded unit");
                declarations.clone()
            }
            None => {
                let declarations = self.loader.load(self, path)?;
                debug!(
                    context = %self.name,
                    path = %path.display(),
                    types = declarations.len(),
                    "Loaded code unit"
                );
                units.insert(path.to_path_buf(), declarations.clone());
                declarations
            }
        };
        drop(units);

        Ok(CodeUnit {
            declarations,
            path: path.to_path_buf(),
            context: Arc::clone(self),
        })
    }

    /// Refuses further loads. Libraries are closed when the last reference
    /// to the context is dropped.
    pub fn unload(&self) {
        if !self.unloading.swap(true, Ordering::AcqRel) {
            debug!(context = %self.name, "Load context unloading");
        }
    }

    /// Number of libraries held open by this context.
    pub fn library_count(&self) -> usize {
        self.libraries.lock().len()
    }

    /// Keeps `library` open for the lifetime of this context.
    pub fn retain_library(&self, library: Library) {
        self.libraries.lock().push(library);
    }
}

impl Drop for LoadContext {
    fn drop(&mut self) {
        self.units.get_mut().clear();
        close_in_reverse(self.libraries.get_mut());
        trace!(context = %self.name, "Load context released");
    }
}

/// Closes dependents before their dependencies.
fn close_in_reverse(libraries: &mut Vec<Library>) {
    while let Some(library) = libraries.pop() {
        drop(library);
    }
}

/// Libraries opened for one unit. Closed again unless handed to a context.
#[derive(Default)]
struct OpenedLibraries(Vec<Library>);

impl OpenedLibraries {
    fn push(&mut self, library: Library) {
        self.0.push(library);
    }

    fn retain_in(mut self, context: &LoadContext) {
        for library in self.0.drain(..) {
            context.retain_library(library);
        }
    }
}

impl Drop for OpenedLibraries {
    fn drop(&mut self) {
        close_in_reverse(&mut self.0);
    }
}

impl fmt::Debug for LoadContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadContext")
            .field("name", &self.name)
            .field("root", &self.root)
            .field("unloading", &self.is_unloading())
            .finish_non_exhaustive()
    }
}

/// A loaded code unit. Holds its load context alive.
pub struct CodeUnit {
    declarations: Vec<PlugInDeclaration>,
    path: PathBuf,
    context: Arc<LoadContext>,
}

impl CodeUnit {
    pub fn declarations(&self) -> &[PlugInDeclaration] {
        &self.declarations
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn context(&self) -> &Arc<LoadContext> {
        &self.context
    }
}

impl fmt::Debug for CodeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeUnit")
            .field("path", &self.path)
            .field("context", &self.context.name)
            .field("types", &self.declarations.len())
            .finish()
    }
}

fn check_compatible(declarations: &[PlugInDeclaration]) -> HostResult<()> {
    match declarations.iter().find(|d| !d.is_compatible()) {
        Some(declaration) => Err(HostError::IncompatiblePlugIn {
            type_name: declaration.type_name.to_string(),
            found: declaration.api_version_string(),
            expected: format!(
                "{}.{}",
                PLUGHOST_API_VERSION >> 16,
                PLUGHOST_API_VERSION & 0xFFFF
            ),
        }),
        None => Ok(()),
    }
}

/// `<stem>.deps.json` beside a shared library.
#[derive(Debug, Default, Deserialize)]
struct DependencyManifest {
    #[serde(default)]
    dependencies: Vec<String>,
}

/// Loads shared libraries exporting `plughost_register`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeUnitLoader;

impl NativeUnitLoader {
    fn manifest_path(path: &Path) -> Option<PathBuf> {
        let stem = path.file_stem()?.to_str()?;
        Some(path.with_file_name(format!("{stem}.deps.json")))
    }

    fn read_manifest(path: &Path) -> HostResult<DependencyManifest> {
        let Some(manifest_path) = Self::manifest_path(path) else {
            return Ok(DependencyManifest::default());
        };
        if !manifest_path.is_file() {
            return Ok(DependencyManifest::default());
        }

        let text = std::fs::read_to_string(&manifest_path).map_err(|source| {
            HostError::DependencyManifest {
                path: manifest_path.clone(),
                source,
            }
        })?;
        serde_json::from_str(&text).map_err(|e| HostError::DependencyManifest {
            path: manifest_path,
            source: e.into(),
        })
    }

    /// Beside the unit first, otherwise by bare name through the system
    /// search path.
    fn resolve_dependency(unit: &Path, dependency: &str) -> PathBuf {
        let local = unit.with_file_name(dependency);
        if local.is_file() {
            local
        } else {
            PathBuf::from(dependency)
        }
    }

    fn open(path: &Path) -> HostResult<Library> {
        // SAFETY: opening a plug-in library runs its initialisers; packages
        // are trusted code installed by the operator.
        unsafe { Library::new(path) }.map_err(|source| HostError::LibraryLoad {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl UnitLoader for NativeUnitLoader {
    fn load(&self, context: &LoadContext, path: &Path) -> HostResult<Vec<PlugInDeclaration>> {
        if !path.is_file() {
            return Err(HostError::AssetNotFound(path.to_path_buf()));
        }

        let manifest = Self::read_manifest(path)?;
        let mut opened = OpenedLibraries::default();
        for dependency in &manifest.dependencies {
            let resolved = Self::resolve_dependency(path, dependency);
            trace!(context = %context.name(), dependency = %resolved.display(), "Loading dependency");
            opened.push(Self::open(&resolved)?);
        }

        let library = Self::open(path)?;
        let mut declarations: Vec<PlugInDeclaration> = Vec::new();
        {
            // SAFETY: the symbol is generated by `export_plug_in!` with the
            // `RegisterFn` signature.
            let register = unsafe { library.get::<RegisterFn>(PLUG_IN_REGISTER_SYMBOL) }
                .map_err(|_| HostError::PlugInTypeNotFound(path.to_path_buf()))?;
            register(&mut declarations);
        }
        opened.push(library);

        // names are copied into the error while the library is still open
        check_compatible(&declarations)?;
        opened.retain_in(context);
        Ok(declarations)
    }
}

/// Serves declarations of plug-ins compiled into the host binary.
#[derive(Debug, Default)]
pub struct LinkedUnitLoader {
    units: HashMap<PathBuf, Vec<PlugInDeclaration>>,
}

impl LinkedUnitLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `declarations` for loads of `path`.
    pub fn with_unit(
        mut self,
        path: impl Into<PathBuf>,
        declarations: impl IntoIterator<Item = PlugInDeclaration>,
    ) -> Self {
        self.insert(path, declarations);
        self
    }

    pub fn insert(
        &mut self,
        path: impl Into<PathBuf>,
        declarations: impl IntoIterator<Item = PlugInDeclaration>,
    ) {
        self.units
            .entry(path.into())
            .or_default()
            .extend(declarations);
    }
}

impl UnitLoader for LinkedUnitLoader {
    fn load(&self, _context: &LoadContext, path: &Path) -> HostResult<Vec<PlugInDeclaration>> {
        let declarations = self
            .units
            .get(path)
            .ok_or_else(|| HostError::AssetNotFound(path.to_path_buf()))?;
        check_compatible(declarations)?;
        Ok(declarations.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use plughost_core::{
        BuildResult, CancellationToken, NoConfiguration, PlugIn, PlugInContext, PlugInError,
        PlugInFactory, declare,
    };

    use super::*;

    struct Idle;

    #[async_trait]
    impl PlugIn for Idle {
        async fn execute(&self, _cancellation: CancellationToken) -> Result<(), PlugInError> {
            Ok(())
        }
    }

    impl PlugInFactory for Idle {
        type Configuration = NoConfiguration;

        fn create(_context: PlugInContext<NoConfiguration>) -> BuildResult<Self> {
            Ok(Self)
        }
    }

    struct CountingLoader {
        inner: LinkedUnitLoader,
        loads: AtomicUsize,
    }

    impl UnitLoader for CountingLoader {
        fn load(&self, context: &LoadContext, path: &Path) -> HostResult<Vec<PlugInDeclaration>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.inner.load(context, path)
        }
    }

    #[test]
    fn test_units_are_cached_per_path() {
        let loader = Arc::new(CountingLoader {
            inner: LinkedUnitLoader::new().with_unit("idle.so", [declare::<Idle>()]),
            loads: AtomicUsize::new(0),
        });
        let context = Arc::new(LoadContext::new("pkg-1", None, loader.clone()));

        let first = context.load_unit(Path::new("idle.so")).unwrap();
        let second = context.load_unit(Path::new("idle.so")).unwrap();

        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert_eq!(first.declarations().len(), 1);
        assert_eq!(second.path(), Path::new("idle.so"));
        assert!(Arc::ptr_eq(first.context(), &context));
    }

    #[test]
    fn test_unloading_context_rejects_loads() {
        let loader = Arc::new(LinkedUnitLoader::new().with_unit("idle.so", [declare::<Idle>()]));
        let context = Arc::new(LoadContext::new("pkg-1", None, loader));
        context.unload();

        let err = context.load_unit(Path::new("idle.so")).unwrap_err();
        assert!(matches!(err, HostError::LoadContextUnloading(name) if name == "pkg-1"));
    }

    #[test]
    fn test_unknown_linked_unit_is_not_found() {
        let context = Arc::new(LoadContext::new(
            "pkg-1",
            None,
            Arc::new(LinkedUnitLoader::new()),
        ));
        let err = context.load_unit(Path::new("missing.so")).unwrap_err();
        assert!(matches!(err, HostError::AssetNotFound(_)));
    }

    #[test]
    fn test_incompatible_declaration_is_rejected() {
        let mut declaration = declare::<Idle>();
        declaration.api_version = 0x0002_0000;
        let loader = Arc::new(LinkedUnitLoader::new().with_unit("idle.so", [declaration]));
        let context = Arc::new(LoadContext::new("pkg-1", None, loader));

        let err = context.load_unit(Path::new("idle.so")).unwrap_err();
        assert!(matches!(err, HostError::IncompatiblePlugIn { found, .. } if found == "2.0"));
    }

    #[test]
    fn test_native_loader_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let context = Arc::new(LoadContext::new(
            "pkg-1",
            Some(dir.path().to_path_buf()),
            Arc::new(NativeUnitLoader),
        ));
        let err = context
            .load_unit(&dir.path().join("libabsent.so"))
            .unwrap_err();
        assert!(matches!(err, HostError::AssetNotFound(_)));
    }

    #[test]
    fn test_native_loader_rejects_malformed_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let unit = dir.path().join("libbroken.so");
        std::fs::write(&unit, b"not a library").unwrap();
        std::fs::write(dir.path().join("libbroken.deps.json"), b"{ nope").unwrap();

        let context = Arc::new(LoadContext::new("pkg-1", None, Arc::new(NativeUnitLoader)));
        let err = context.load_unit(&unit).unwrap_err();
        assert!(matches!(err, HostError::DependencyManifest { .. }));
    }

    #[test]
    fn test_native_loader_reports_unloadable_library() {
        let dir = tempfile::tempdir().unwrap();
        let unit = dir.path().join("libgarbage.so");
        std::fs::write(&unit, b"not a library").unwrap();

        let context = Arc::new(LoadContext::new("pkg-1", None, Arc::new(NativeUnitLoader)));
        let err = context.load_unit(&unit).unwrap_err();
        assert!(matches!(err, HostError::LibraryLoad { .. }));
        assert_eq!(context.library_count(), 0);
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    #[test]
    fn test_failed_unit_closes_its_dependencies() {
        let dir = tempfile::tempdir().unwrap();
        let unit = dir.path().join("libbroken.so");
        std::fs::write(&unit, b"not a library").unwrap();
        std::fs::write(
            dir.path().join("libbroken.deps.json"),
            br#"{"dependencies": ["libc.so.6"]}"#,
        )
        .unwrap();

        let context = Arc::new(LoadContext::new("pkg-1", None, Arc::new(NativeUnitLoader)));
        let err = context.load_unit(&unit).unwrap_err();
        assert!(matches!(err, HostError::LibraryLoad { ref path, .. } if path == &unit));
        assert_eq!(context.library_count(), 0);
    }

    #[test]
    fn test_dependency_resolution_prefers_unit_directory() {
        let dir = tempfile::tempdir().unwrap();
        let unit = dir.path().join("libmain.so");
        std::fs::write(dir.path().join("libhelper.so"), b"").unwrap();

        assert_eq!(
            NativeUnitLoader::resolve_dependency(&unit, "libhelper.so"),
            dir.path().join("libhelper.so")
        );
        assert_eq!(
            NativeUnitLoader::resolve_dependency(&unit, "libc.so.6"),
            PathBuf::from("libc.so.6")
        );
    }
}
