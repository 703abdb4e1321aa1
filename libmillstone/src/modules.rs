use std::any::Any;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, ThreadId};

use errors::*;
use source::SourceScript;

/// Separator of module id segments, independent of the host path convention.
pub const MODULE_SEPARATOR: char = '/';

/// The value a module exposes to the code requiring it.
pub type Exports = Arc<Any + Send + Sync>;

enum ModuleState {
    /// The module's top-level code is being evaluated by a thread.
    Loading(ThreadId),
    Loaded(Exports),
}

#[derive(Default)]
struct ModuleCache {
    modules: HashMap<String, ModuleState>,
    // The module each thread is blocked on, keyed by the waiting thread.
    waiting: HashMap<ThreadId, String>,
}

impl ModuleCache {
    /// Whether waiting for a module loaded by `owner` would make `current` wait for itself.
    fn waits_for(&self, owner: ThreadId, current: ThreadId) -> bool {
        let mut thread = owner;
        for _ in 0..self.waiting.len() + 1 {
            if thread == current {
                return true;
            }
            thread = match self.waiting.get(&thread).and_then(|name| self.modules.get(name)) {
                Some(&ModuleState::Loading(next)) => next,
                _ => return false,
            };
        }
        false
    }
}

/// `ModuleEvaluator` runs a module's top-level code and returns what the module exports.
pub trait ModuleEvaluator: Send + Sync {
    fn evaluate(&self, scope: &ModuleScope, source: &SourceScript) -> Result<Exports>;
}

/// Exports the module's `SourceScript` as is, leaving its interpretation to the requiring code.
pub struct SourceEvaluator;

impl ModuleEvaluator for SourceEvaluator {
    fn evaluate(&self, _scope: &ModuleScope, source: &SourceScript) -> Result<Exports> {
        Ok(Arc::new(source.clone()))
    }
}

/// `ModuleScope` is the only binding a module's top-level code gets from the host.
///
/// It carries the module's own id and a `require` bound to the same resolver, so modules can load
/// other modules. Nothing from the requiring code's scope leaks in.
pub struct ModuleScope<'a> {
    module_id: &'a str,
    resolver: &'a ModuleResolver,
    evaluator: &'a ModuleEvaluator,
}

impl<'a> ModuleScope<'a> {
    pub fn module_id(&self) -> &str {
        self.module_id
    }

    pub fn require(&self, module_id: &str) -> Result<Exports> {
        self.resolver.require(self.evaluator, module_id)
    }
}

fn check_sandboxed(module_id: &str) -> Result<()> {
    if module_id.is_empty() {
        return Err(ErrorKind::InvalidArgument("empty module id".to_owned()).into());
    }

    let escapes = module_id.starts_with('.') || module_id.starts_with(MODULE_SEPARATOR)
        || module_id.starts_with('\\') || Path::new(module_id).is_absolute()
        || module_id
            .split(|c| c == MODULE_SEPARATOR || c == '\\')
            .any(|segment| segment == "." || segment == "..");
    if escapes {
        return Err(ErrorKind::SandboxViolation(module_id.to_owned()).into());
    }

    if module_id.split(MODULE_SEPARATOR).any(|segment| segment.is_empty()) {
        return Err(
            ErrorKind::InvalidArgument(format!("module id <{}> has an empty segment", module_id))
                .into(),
        );
    }
    Ok(())
}

/// Finds the file of a module.
///
/// Module ids are `/`-separated and relative to one of the search roots. Ids starting with `.`,
/// `..` or an absolute path marker are always rejected, whatever the roots are. The first root
/// containing `<root>/<segments>.<extension>` wins.
pub fn resolve<P: AsRef<Path>>(roots: &[P], module_id: &str, extension: &str) -> Result<PathBuf> {
    check_sandboxed(module_id)?;

    let mut segments: Vec<&str> = module_id.split(MODULE_SEPARATOR).collect();
    let file_name = match segments.pop() {
        Some(last) if extension.is_empty() => last.to_owned(),
        Some(last) => format!("{}.{}", last, extension),
        None => return Err(ErrorKind::ModuleNotFound(module_id.to_owned()).into()),
    };
    let mut relative: PathBuf = segments.into_iter().collect();
    relative.push(file_name);

    for root in roots {
        let candidate = root.as_ref().join(&relative);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }
    Err(ErrorKind::ModuleNotFound(module_id.to_owned()).into())
}

/// `ModuleResolver` implements sandboxed `require` for the script contexts of one calculation run.
///
/// Modules are singletons: the exports of a module are cached by its fully qualified path and the
/// module's top-level code is evaluated at most once, however many workers require it.
pub struct ModuleResolver {
    roots: Vec<PathBuf>,
    extension: String,
    cache: Mutex<ModuleCache>,
    loaded: Condvar,
}

impl ModuleResolver {
    pub fn new<I, P>(roots: I, extension: &str) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        ModuleResolver {
            roots: roots.into_iter().map(Into::into).collect(),
            extension: extension.to_owned(),
            cache: Mutex::new(ModuleCache::default()),
            loaded: Condvar::new(),
        }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn resolve(&self, module_id: &str) -> Result<PathBuf> {
        resolve(&self.roots, module_id, &self.extension)
    }

    /// Resolves, reads and loads a module.
    pub fn require(&self, evaluator: &ModuleEvaluator, module_id: &str) -> Result<Exports> {
        let path = self.resolve(module_id)?;
        let path = fs::canonicalize(&path)
            .chain_err(|| format!("Unable to resolve path of module <{}>", module_id))?;
        let source = SourceScript::from_file(&path)
            .chain_err(|| format!("Unable to read module <{}>", module_id))?;

        self.load(evaluator, module_id, &source)
    }

    /// Returns the cached exports of `source`, evaluating it first if this is its first load.
    ///
    /// A thread requiring a module another thread is still loading waits for it. Requiring a
    /// module that is (directly or through other waiting threads) waiting for the current thread
    /// fails with `CyclicRequire`.
    pub fn load(
        &self,
        evaluator: &ModuleEvaluator,
        module_id: &str,
        source: &SourceScript,
    ) -> Result<Exports> {
        let qualified_name = source.qualified_name().to_owned();
        let current = thread::current().id();

        {
            let mut cache = self.cache.lock().unwrap();
            loop {
                let owner = match cache.modules.get(&qualified_name) {
                    Some(&ModuleState::Loaded(ref exports)) => return Ok(Arc::clone(exports)),
                    Some(&ModuleState::Loading(owner)) => owner,
                    None => break,
                };
                if cache.waits_for(owner, current) {
                    return Err(ErrorKind::CyclicRequire(module_id.to_owned()).into());
                }

                cache.waiting.insert(current, qualified_name.clone());
                cache = self.loaded.wait(cache).unwrap();
                cache.waiting.remove(&current);
            }
            cache
                .modules
                .insert(qualified_name.clone(), ModuleState::Loading(current));
        }

        debug!("Loading module <{}> from {}", module_id, qualified_name);
        let mut pending = PendingLoad {
            resolver: self,
            qualified_name: &qualified_name,
            exports: None,
        };
        let result = {
            let scope = ModuleScope {
                module_id,
                resolver: self,
                evaluator,
            };
            evaluator.evaluate(&scope, source)
        };

        let loaded = result.chain_err(|| format!("Failed to load module <{}>", module_id))?;
        pending.exports = Some(Arc::clone(&loaded));
        Ok(loaded)
    }

    /// Number of modules whose exports are cached.
    pub fn num_loaded(&self) -> usize {
        let cache = self.cache.lock().unwrap();
        cache
            .modules
            .values()
            .filter(|state| match **state {
                ModuleState::Loaded(_) => true,
                ModuleState::Loading(_) => false,
            })
            .count()
    }
}

/// Settles a module load when dropped: the exports are cached on success, otherwise the module
/// is forgotten so a later require evaluates it again. Waiting threads are woken either way, also
/// when the evaluation panicked.
struct PendingLoad<'a> {
    resolver: &'a ModuleResolver,
    qualified_name: &'a str,
    exports: Option<Exports>,
}

impl<'a> Drop for PendingLoad<'a> {
    fn drop(&mut self) {
        let mut cache = match self.resolver.cache.lock() {
            Ok(cache) => cache,
            Err(poisoned) => poisoned.into_inner(),
        };
        match self.exports.take() {
            Some(exports) => {
                cache
                    .modules
                    .insert(self.qualified_name.to_owned(), ModuleState::Loaded(exports));
            }
            None => {
                cache.modules.remove(self.qualified_name);
            }
        }
        self.resolver.loaded.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    use tempfile::TempDir;

    use super::*;

    /// Evaluates modules whose lines are either `require <id>` or plain export text.
    struct LineEvaluator {
        evaluations: AtomicUsize,
        delay: Duration,
    }

    impl LineEvaluator {
        fn new() -> Self {
            LineEvaluator::slow(Duration::from_millis(0))
        }

        /// Sleeps before evaluating, so concurrent loads overlap.
        fn slow(delay: Duration) -> Self {
            LineEvaluator {
                evaluations: AtomicUsize::new(0),
                delay,
            }
        }
    }

    impl ModuleEvaluator for LineEvaluator {
        fn evaluate(&self, scope: &ModuleScope, source: &SourceScript) -> Result<Exports> {
            self.evaluations.fetch_add(1, Ordering::SeqCst);
            thread::sleep(self.delay);
            let mut exported = String::new();
            for line in source.text().lines() {
                if line.starts_with("require ") {
                    let dependency = scope.require(&line["require ".len()..])?;
                    if let Some(text) = dependency.downcast_ref::<String>() {
                        exported.push_str(text);
                    }
                } else {
                    exported.push_str(line);
                }
            }
            Ok(Arc::new(exported))
        }
    }

    fn write_module(root: &Path, relative: &str, text: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut file = File::create(path).unwrap();
        file.write_all(text.as_bytes()).unwrap();
    }

    fn expect_sandbox_violation(result: Result<PathBuf>) {
        match result {
            Err(ref err) => match *err.kind() {
                ErrorKind::SandboxViolation(_) => {}
                _ => panic!("expected SandboxViolation, got {}", err),
            },
            Ok(path) => panic!("expected SandboxViolation, resolved {}", path.display()),
        }
    }

    #[test]
    fn relative_and_absolute_ids_are_rejected() {
        let dir = TempDir::new().unwrap();
        write_module(dir.path(), "x.js", "x");
        let roots = vec![dir.path().to_path_buf(), PathBuf::from("/")];

        expect_sandbox_violation(resolve(&roots, "./x", "js"));
        expect_sandbox_violation(resolve(&roots, "../x", "js"));
        expect_sandbox_violation(resolve(&roots, "/x", "js"));
        expect_sandbox_violation(resolve(&roots, ".x", "js"));
        expect_sandbox_violation(resolve(&roots, "lib/../../x", "js"));
        let no_roots: Vec<PathBuf> = Vec::new();
        expect_sandbox_violation(resolve(&no_roots, "./x", "js"));
    }

    #[test]
    fn first_matching_root_wins() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        write_module(second.path(), "lib/util.js", "second");
        write_module(first.path(), "other.js", "first");
        let roots = vec![first.path().to_path_buf(), second.path().to_path_buf()];

        assert_eq!(
            second.path().join("lib").join("util.js"),
            resolve(&roots, "lib/util", "js").unwrap()
        );

        write_module(first.path(), "lib/util.js", "first");
        assert_eq!(
            first.path().join("lib").join("util.js"),
            resolve(&roots, "lib/util", "js").unwrap()
        );
    }

    #[test]
    fn missing_module_is_not_found() {
        let dir = TempDir::new().unwrap();
        let roots = vec![dir.path().to_path_buf()];

        match *resolve(&roots, "nothing/here", "js").unwrap_err().kind() {
            ErrorKind::ModuleNotFound(ref id) => assert_eq!("nothing/here", id),
            ref other => panic!("expected ModuleNotFound, got {:?}", other),
        }
    }

    #[test]
    fn modules_are_singletons() {
        let dir = TempDir::new().unwrap();
        write_module(dir.path(), "counter.js", "count");
        let resolver = ModuleResolver::new(vec![dir.path()], "js");
        let evaluator = LineEvaluator::new();

        let first = resolver.require(&evaluator, "counter").unwrap();
        let second = resolver.require(&evaluator, "counter").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(1, evaluator.evaluations.load(Ordering::SeqCst));
        assert_eq!(1, resolver.num_loaded());
    }

    #[test]
    fn nested_requires_share_the_cache() {
        let dir = TempDir::new().unwrap();
        write_module(dir.path(), "a.js", "a\nrequire lib/b");
        write_module(dir.path(), "lib/b.js", "b");
        let resolver = ModuleResolver::new(vec![dir.path()], "js");
        let evaluator = LineEvaluator::new();

        let a = resolver.require(&evaluator, "a").unwrap();
        let b = resolver.require(&evaluator, "lib/b").unwrap();

        assert_eq!(Some(&"ab".to_owned()), a.downcast_ref::<String>());
        assert_eq!(Some(&"b".to_owned()), b.downcast_ref::<String>());
        assert_eq!(2, evaluator.evaluations.load(Ordering::SeqCst));
    }

    #[test]
    fn cyclic_requires_fail() {
        let dir = TempDir::new().unwrap();
        write_module(dir.path(), "a.js", "require b");
        write_module(dir.path(), "b.js", "require a");
        let resolver = ModuleResolver::new(vec![dir.path()], "js");
        let evaluator = LineEvaluator::new();

        let err = resolver.require(&evaluator, "a").unwrap_err();

        let cyclic = err.iter().any(|e| e.to_string().contains("still loading"));
        assert!(cyclic, "unexpected error: {}", err);
        assert_eq!(0, resolver.num_loaded());
    }

    #[test]
    fn cross_thread_cycle_fails_instead_of_blocking() {
        let dir = TempDir::new().unwrap();
        write_module(dir.path(), "a.js", "require b");
        write_module(dir.path(), "b.js", "require a");
        let resolver = Arc::new(ModuleResolver::new(vec![dir.path()], "js"));
        let evaluator = Arc::new(LineEvaluator::slow(Duration::from_millis(200)));
        let (sender, receiver) = mpsc::channel();

        for module_id in vec!["a", "b"] {
            let resolver = Arc::clone(&resolver);
            let evaluator = Arc::clone(&evaluator);
            let sender = sender.clone();
            thread::spawn(move || {
                let result = resolver.require(&*evaluator, module_id);
                sender.send(result.map(|_| ())).unwrap();
            });
        }

        for _ in 0..2 {
            let result = receiver.recv_timeout(Duration::from_secs(10)).unwrap();
            let err = result.unwrap_err();
            let cyclic = err.iter().any(|e| e.to_string().contains("still loading"));
            assert!(cyclic, "unexpected error: {}", err);
        }
        assert_eq!(0, resolver.num_loaded());
    }

    #[test]
    fn concurrent_requires_share_one_evaluation() {
        let dir = TempDir::new().unwrap();
        write_module(dir.path(), "shared.js", "shared");
        let resolver = Arc::new(ModuleResolver::new(vec![dir.path()], "js"));
        let evaluator = Arc::new(LineEvaluator::slow(Duration::from_millis(100)));

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let resolver = Arc::clone(&resolver);
                let evaluator = Arc::clone(&evaluator);
                thread::spawn(move || resolver.require(&*evaluator, "shared").unwrap())
            })
            .collect();
        let exports: Vec<Exports> = workers.into_iter().map(|w| w.join().unwrap()).collect();

        assert_eq!(1, evaluator.evaluations.load(Ordering::SeqCst));
        assert!(exports.iter().all(|e| Arc::ptr_eq(e, &exports[0])));
    }
}
