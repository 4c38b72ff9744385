//! Turns a task declaration plus a repository working tree into the
//! canonical, digestible input set the rest of the engine keys on.

mod error;
mod glob;

pub use error::ResolveError;

use crate::model::{
    digest_reader, digest_string, Digest, Input, InputEnvVar, InputFile, InputString,
    InputTaskInfo, Inputs, Task, TaskId, TaskSet, TASK_CFG_INPUT_KEY,
};
use crate::vcs::Vcs;
use futures::future::{self, BoxFuture, FutureExt};
use fxhash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::instrument;

/// Cap on concurrently open input files, so wide globs cannot exhaust file
/// descriptors.
const MAX_CONCURRENT_FILE_READS: usize = 64;

/// Resolves the input set of tasks against a working tree and its VCS state.
///
/// Extra input strings given at construction participate in the fingerprint
/// of every task this resolver touches. In dirty-permitted mode, untracked
/// files matching a task's globs count as inputs; otherwise only tracked
/// files do.
pub struct InputResolver {
    repo_root: PathBuf,
    vcs: Arc<dyn Vcs>,
    extra_input_strings: Vec<String>,
    dirty_permitted: bool,
    file_read_permits: Arc<Semaphore>,
}

impl InputResolver {
    pub fn new(
        repo_root: PathBuf,
        vcs: Arc<dyn Vcs>,
        extra_input_strings: Vec<String>,
        dirty_permitted: bool,
    ) -> Self {
        Self {
            repo_root,
            vcs,
            extra_input_strings,
            dirty_permitted,
            file_read_permits: Arc::new(Semaphore::new(MAX_CONCURRENT_FILE_READS)),
        }
    }

    /// Resolves the complete input set of `task`. Upstream tasks referenced
    /// via task-info inputs are resolved transitively; cycles are reported,
    /// not followed.
    #[instrument(name = "InputResolver::resolve", skip(self, tasks, task), fields(task = %task.id()))]
    pub async fn resolve(&self, tasks: &TaskSet, task: &Task) -> Result<Inputs, ResolveError> {
        let mut stack = vec![task.id()];
        let mut memo = FxHashMap::default();
        self.resolve_task(tasks, task, &mut stack, &mut memo).await
    }

    fn resolve_task<'a>(
        &'a self,
        tasks: &'a TaskSet,
        task: &'a Task,
        stack: &'a mut Vec<TaskId>,
        memo: &'a mut FxHashMap<TaskId, Digest>,
    ) -> BoxFuture<'a, Result<Inputs, ResolveError>> {
        async move {
            let mut collected: Vec<Input> = vec![];

            for file in self.resolve_files(task).await? {
                collected.push(Input::File(file));
            }

            for spec in task.input_env_vars() {
                match std::env::var_os(&spec.name) {
                    Some(value) => {
                        let digest = digest_string(&value.to_string_lossy());
                        collected.push(Input::EnvVar(InputEnvVar::new(spec.name.as_str(), digest)));
                    }
                    None if spec.optional => {
                        collected.push(Input::EnvVar(InputEnvVar::new(
                            spec.name.as_str(),
                            digest_string(""),
                        )));
                    }
                    None => return Err(ResolveError::MissingEnvVar(spec.name.clone())),
                }
            }

            collected.push(Input::String(InputString::new(format!(
                "{TASK_CFG_INPUT_KEY}:{}",
                task.cfg_digest()
            ))));

            for dep_id in task.input_tasks() {
                let digest = match memo.get(dep_id) {
                    Some(digest) => digest.clone(),
                    None => {
                        if stack.contains(dep_id) {
                            let mut chain = stack.clone();
                            chain.push(dep_id.clone());
                            return Err(ResolveError::CyclicTaskDependency { chain });
                        }
                        let dep = tasks.get(dep_id).ok_or_else(|| {
                            ResolveError::UnknownTaskDependency {
                                task: task.id(),
                                dependency: dep_id.clone(),
                            }
                        })?;

                        stack.push(dep_id.clone());
                        let dep_inputs = self.resolve_task(tasks, dep, stack, memo).await?;
                        stack.pop();

                        let digest = dep_inputs.combined_digest();
                        memo.insert(dep_id.clone(), digest.clone());
                        digest
                    }
                };
                collected.push(Input::TaskInfo(InputTaskInfo::new(
                    dep_id.to_string(),
                    digest,
                )));
            }

            for value in &self.extra_input_strings {
                collected.push(Input::String(InputString::new(value.clone())));
            }

            deduplicate(collected)
        }
        .boxed()
    }

    async fn resolve_files(&self, task: &Task) -> Result<Vec<InputFile>, ResolveError> {
        if task.input_globs().is_empty() {
            return Ok(vec![]);
        }

        let tracked: FxHashSet<PathBuf> = self
            .vcs
            .tracked_files_matching(&[])?
            .into_iter()
            .collect();
        let untracked: FxHashSet<PathBuf> = if self.dirty_permitted {
            self.vcs.untracked_files()?.into_iter().collect()
        } else {
            FxHashSet::default()
        };

        // Keyed by recorded path so overlapping globs digest a file once.
        let mut matches: BTreeMap<PathBuf, glob::ResolvedPath> = BTreeMap::new();
        for pattern in task.input_globs() {
            for candidate in glob::expand(&self.repo_root, task.directory(), pattern)? {
                if tracked.contains(&candidate.matched) || untracked.contains(&candidate.matched)
                {
                    matches.insert(candidate.recorded.clone(), candidate);
                }
            }
        }

        future::try_join_all(matches.into_values().map(|path| self.digest_file(path))).await
    }

    async fn digest_file(&self, path: glob::ResolvedPath) -> Result<InputFile, ResolveError> {
        let _permit = self
            .file_read_permits
            .acquire()
            .await
            .expect("file-read semaphore closed");

        let file = std::fs::File::open(&path.absolute).map_err(|err| ResolveError::Io {
            path: path.absolute.clone(),
            err,
        })?;
        let digest = digest_reader(BufReader::new(file)).map_err(|err| {
            ResolveError::DigestFailed {
                path: path.absolute.clone(),
                err,
            }
        })?;

        Ok(InputFile::new(path.recorded, digest))
    }
}

/// Deduplicates by `(kind, string form)`. Identical duplicates collapse to
/// their first occurrence; duplicates with differing digests are an input
/// conflict.
fn deduplicate(inputs: Vec<Input>) -> Result<Inputs, ResolveError> {
    let mut seen: FxHashMap<(u8, String), Digest> = FxHashMap::default();
    let mut result = Inputs::default();

    for input in inputs {
        let key = (kind_tag(&input), input.string_form());
        match seen.get(&key) {
            None => {
                seen.insert(key, input.digest().clone());
                result.push(input);
            }
            Some(existing) if existing == input.digest() => {}
            Some(existing) => {
                return Err(ResolveError::InputConflict {
                    input: key.1,
                    left: existing.clone(),
                    right: input.digest().clone(),
                })
            }
        }
    }

    Ok(result)
}

fn kind_tag(input: &Input) -> u8 {
    match input {
        Input::File(_) => 0,
        Input::String(_) => 1,
        Input::EnvVar(_) => 2,
        Input::TaskInfo(_) => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::digest_bytes;
    use crate::vcs::VcsError;
    use std::fs;
    use std::path::Path;

    /// VCS stub that tracks every file in the fixture tree.
    struct TrackEverything {
        root: PathBuf,
    }

    impl Vcs for TrackEverything {
        fn commit_id(&self) -> Result<String, VcsError> {
            Ok("0000000000000000000000000000000000000000".into())
        }

        fn is_dirty(&self) -> Result<bool, VcsError> {
            Ok(false)
        }

        fn untracked_files(&self) -> Result<Vec<PathBuf>, VcsError> {
            Ok(vec![])
        }

        fn tracked_files_matching(&self, _globs: &[String]) -> Result<Vec<PathBuf>, VcsError> {
            let mut files = vec![];
            walk(&self.root, &self.root, &mut files);
            Ok(files)
        }
    }

    fn walk(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) {
        for entry in fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                walk(root, &path, out);
            } else {
                out.push(path.strip_prefix(root).unwrap().to_path_buf());
            }
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        tasks: TaskSet,
    }

    fn task_in(dir: &Path, app: &str, name: &str) -> crate::model::TaskBuilder {
        let mut builder = Task::builder();
        builder
            .app_name(app)
            .task_name(name)
            .directory(dir.join(app))
            .command(vec!["true".to_string()])
            .cfg_digest(digest_string(&format!("{app}.{name}")));
        builder
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("demo/src")).unwrap();
        fs::write(dir.path().join("demo/src/a.c"), "int main(){}").unwrap();
        fs::write(dir.path().join("demo/src/b.c"), "int b;").unwrap();

        let mut tasks = TaskSet::new();
        tasks
            .insert(
                task_in(dir.path(), "demo", "build")
                    .input_globs(vec!["src/*.c".to_string()])
                    .build()
                    .unwrap(),
            )
            .unwrap();

        Fixture { dir, tasks }
    }

    fn resolver(fix: &Fixture, extra: Vec<String>) -> InputResolver {
        InputResolver::new(
            fix.dir.path().to_path_buf(),
            Arc::new(TrackEverything {
                root: fix.dir.path().to_path_buf(),
            }),
            extra,
            false,
        )
    }

    fn demo_build(fix: &Fixture) -> &Task {
        fix.tasks.get(&TaskId::new("demo", "build")).unwrap()
    }

    #[tokio::test]
    async fn resolves_glob_files_with_content_digests() {
        let fix = fixture();
        let inputs = resolver(&fix, vec![])
            .resolve(&fix.tasks, demo_build(&fix))
            .await
            .unwrap();

        let paths: Vec<String> = inputs.files().iter().map(|f| f.string_form()).collect();
        assert_eq!(paths, vec!["demo/src/a.c", "demo/src/b.c"]);
        assert_eq!(
            inputs.files()[0].digest(),
            &digest_bytes(b"int main(){}")
        );
        // The reserved declaration entry is always present.
        assert!(inputs.strings().iter().any(InputString::is_task_cfg));
    }

    #[tokio::test]
    async fn untracked_files_are_invisible_unless_dirty_permitted() {
        let fix = fixture();
        fs::write(fix.dir.path().join("demo/src/loose.c"), "int l;").unwrap();

        struct TrackNothing;
        impl Vcs for TrackNothing {
            fn commit_id(&self) -> Result<String, VcsError> {
                Ok(String::new())
            }
            fn is_dirty(&self) -> Result<bool, VcsError> {
                Ok(true)
            }
            fn untracked_files(&self) -> Result<Vec<PathBuf>, VcsError> {
                Ok(vec![PathBuf::from("demo/src/loose.c")])
            }
            fn tracked_files_matching(&self, _: &[String]) -> Result<Vec<PathBuf>, VcsError> {
                Ok(vec![])
            }
        }

        let clean = InputResolver::new(
            fix.dir.path().to_path_buf(),
            Arc::new(TrackNothing),
            vec![],
            false,
        );
        let inputs = clean.resolve(&fix.tasks, demo_build(&fix)).await.unwrap();
        assert!(inputs.files().is_empty());

        let dirty = InputResolver::new(
            fix.dir.path().to_path_buf(),
            Arc::new(TrackNothing),
            vec![],
            true,
        );
        let inputs = dirty.resolve(&fix.tasks, demo_build(&fix)).await.unwrap();
        let paths: Vec<String> = inputs.files().iter().map(|f| f.string_form()).collect();
        assert_eq!(paths, vec!["demo/src/loose.c"]);
    }

    #[tokio::test]
    async fn extra_input_strings_change_the_fingerprint() {
        let fix = fixture();
        let plain = resolver(&fix, vec![])
            .resolve(&fix.tasks, demo_build(&fix))
            .await
            .unwrap();
        let extra = resolver(&fix, vec!["release-1".to_string()])
            .resolve(&fix.tasks, demo_build(&fix))
            .await
            .unwrap();

        assert_ne!(plain.combined_digest(), extra.combined_digest());

        // Order of extras does not matter for the fingerprint.
        let xy = resolver(&fix, vec!["x".into(), "y".into()])
            .resolve(&fix.tasks, demo_build(&fix))
            .await
            .unwrap();
        let yx = resolver(&fix, vec!["y".into(), "x".into()])
            .resolve(&fix.tasks, demo_build(&fix))
            .await
            .unwrap();
        assert_eq!(xy.combined_digest(), yx.combined_digest());
    }

    #[tokio::test]
    async fn missing_env_vars_fail_unless_optional() {
        let fix = fixture();
        let mut tasks = TaskSet::new();
        tasks
            .insert(
                task_in(fix.dir.path(), "demo", "envcheck")
                    .input_env_vars(vec![crate::model::EnvVarSpec {
                        name: "CHRONICLE_TEST_UNSET_VAR".to_string(),
                        optional: false,
                    }])
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let task = tasks.get(&TaskId::new("demo", "envcheck")).unwrap();
        let result = resolver(&fix, vec![]).resolve(&tasks, task).await;
        assert_matches!(result, Err(ResolveError::MissingEnvVar(name)) if name == "CHRONICLE_TEST_UNSET_VAR");

        let mut tasks = TaskSet::new();
        tasks
            .insert(
                task_in(fix.dir.path(), "demo", "envcheck")
                    .input_env_vars(vec![crate::model::EnvVarSpec {
                        name: "CHRONICLE_TEST_UNSET_VAR".to_string(),
                        optional: true,
                    }])
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let task = tasks.get(&TaskId::new("demo", "envcheck")).unwrap();
        let inputs = resolver(&fix, vec![]).resolve(&tasks, task).await.unwrap();
        assert_eq!(inputs.env_vars().len(), 1);
        assert_eq!(inputs.env_vars()[0].digest(), &digest_string(""));
    }

    #[tokio::test]
    async fn upstream_tasks_become_task_info_inputs() {
        let fix = fixture();
        let mut tasks = TaskSet::new();
        tasks
            .insert(
                task_in(fix.dir.path(), "demo", "compile")
                    .input_globs(vec!["src/*.c".to_string()])
                    .build()
                    .unwrap(),
            )
            .unwrap();
        tasks
            .insert(
                task_in(fix.dir.path(), "demo", "package")
                    .input_tasks(vec![TaskId::new("demo", "compile")])
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let resolver = resolver(&fix, vec![]);
        let package = tasks.get(&TaskId::new("demo", "package")).unwrap();
        let inputs = resolver.resolve(&tasks, package).await.unwrap();

        assert_eq!(inputs.task_infos().len(), 1);
        assert_eq!(inputs.task_infos()[0].task_name(), "demo.compile");

        let compile = tasks.get(&TaskId::new("demo", "compile")).unwrap();
        let compile_inputs = resolver.resolve(&tasks, compile).await.unwrap();
        assert_eq!(
            inputs.task_infos()[0].digest(),
            &compile_inputs.combined_digest()
        );
    }

    #[tokio::test]
    async fn dependency_cycles_are_detected() {
        let fix = fixture();
        let mut tasks = TaskSet::new();
        tasks
            .insert(
                task_in(fix.dir.path(), "demo", "first")
                    .input_tasks(vec![TaskId::new("demo", "second")])
                    .build()
                    .unwrap(),
            )
            .unwrap();
        tasks
            .insert(
                task_in(fix.dir.path(), "demo", "second")
                    .input_tasks(vec![TaskId::new("demo", "first")])
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let first = tasks.get(&TaskId::new("demo", "first")).unwrap();
        let result = resolver(&fix, vec![]).resolve(&tasks, first).await;
        assert_matches!(result, Err(ResolveError::CyclicTaskDependency { .. }));
    }

    #[tokio::test]
    async fn self_referencing_tasks_are_cycles_too() {
        let fix = fixture();
        let mut tasks = TaskSet::new();
        tasks
            .insert(
                task_in(fix.dir.path(), "demo", "selfish")
                    .input_tasks(vec![TaskId::new("demo", "selfish")])
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let task = tasks.get(&TaskId::new("demo", "selfish")).unwrap();
        let result = resolver(&fix, vec![]).resolve(&tasks, task).await;
        assert_matches!(result, Err(ResolveError::CyclicTaskDependency { .. }));
    }

    #[tokio::test]
    async fn unknown_dependencies_are_reported() {
        let fix = fixture();
        let mut tasks = TaskSet::new();
        tasks
            .insert(
                task_in(fix.dir.path(), "demo", "broken")
                    .input_tasks(vec![TaskId::new("demo", "ghost")])
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let task = tasks.get(&TaskId::new("demo", "broken")).unwrap();
        let result = resolver(&fix, vec![]).resolve(&tasks, task).await;
        assert_matches!(result, Err(ResolveError::UnknownTaskDependency { .. }));
    }

    #[test]
    fn duplicate_inputs_collapse_and_conflicts_error() {
        let same = Input::File(InputFile::new("src/a.c".into(), digest_string("a")));
        let inputs = deduplicate(vec![same.clone(), same.clone()]).unwrap();
        assert_eq!(inputs.files().len(), 1);

        let conflicting = Input::File(InputFile::new("src/a.c".into(), digest_string("b")));
        assert_matches!(
            deduplicate(vec![same, conflicting]),
            Err(ResolveError::InputConflict { .. })
        );
    }

    #[test]
    fn file_and_string_inputs_do_not_collide() {
        let file = Input::File(InputFile::new("string:x".into(), digest_string("a")));
        let string = Input::String(InputString::new("x"));
        let inputs = deduplicate(vec![file, string]).unwrap();
        assert_eq!(inputs.len(), 2);
    }
}
