//! The grading state machine.
//!
//! ```text
//! AssembleWorkspace -> BuildArtifacts
//!   -> per package: RunCorrectness -> RunRaceAndBench -> RunBenchmarkOnly -> CompareBaseline?
//!   -> AggregateCoverage? -> RunLint -> Done
//! ```
//!
//! Every transition is fail-fast and nothing is retried. The pipeline owns
//! the run's [`Workspace`] and [`BinaryCache`] and releases both on every
//! way out, including unwinding.

use crate::bench::{self, BenchmarkRegression};
use crate::build::{ArtifactBuilder, BuildArtifact, TestSuite};
use crate::config::loader::GraderConfig;
use crate::config::types::{GradeError, Halt, Result, RunKind, Stage, SubmissionFailure, Verdict};
use crate::coverage::{self, CoverageRequirement};
use crate::exec::{select_executor, ChildEnv, ExecError, Executor, Invocation};
use crate::overlay::{plan_layers, problem_dir_exists, CopyOverlay, Materializer};
use crate::safety::workspace::{BinaryCache, Workspace};
use crate::toolchain::{toolchain_for, GolangciLint, LintVerdict, Linter, NoLint, Toolchain};
use std::path::{Path, PathBuf};

/// One grading request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GradeRequest {
    pub problem: String,
    pub submission_root: PathBuf,
    pub private_root: PathBuf,
}

impl GradeRequest {
    pub fn new(
        problem: impl Into<String>,
        submission_root: impl Into<PathBuf>,
        private_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            problem: problem.into(),
            submission_root: submission_root.into(),
            private_root: private_root.into(),
        }
    }

    /// Input checks. Nothing is allocated before these pass.
    pub fn validate(&self) -> Result<()> {
        let problem = Path::new(&self.problem);
        if self.problem.is_empty()
            || problem.components().count() != 1
            || self.problem == "."
            || self.problem == ".."
        {
            return Err(GradeError::Input(format!(
                "invalid problem name {:?}",
                self.problem
            )));
        }

        for (role, root) in [
            ("submission", &self.submission_root),
            ("private", &self.private_root),
        ] {
            if !problem_dir_exists(root, &self.problem) {
                return Err(GradeError::Input(format!(
                    "{} repository {} has no directory for problem {}",
                    role,
                    root.display(),
                    self.problem
                )));
            }
        }
        Ok(())
    }
}

/// External tools the pipeline drives. Swappable for fakes in tests.
pub struct Collaborators {
    pub toolchain: Box<dyn Toolchain>,
    pub linter: Box<dyn Linter>,
    pub materializer: Box<dyn Materializer>,
    pub executor: Box<dyn Executor>,
}

impl Collaborators {
    /// Real tools as configured. The execution strategy is chosen here,
    /// once per invocation.
    pub fn system(config: &GraderConfig, private_root: &Path) -> Result<Self> {
        let executor = select_executor(
            &config.sandbox,
            private_root,
            &config.workspace.base_dir,
        )?;

        Ok(Self {
            toolchain: toolchain_for(&config.build.toolchain)?,
            linter: linter_for(config),
            materializer: Box::new(CopyOverlay::new()),
            executor,
        })
    }
}

fn linter_for(config: &GraderConfig) -> Box<dyn Linter> {
    if config.lint.enabled {
        Box::new(GolangciLint::new(&config.lint.program, config.build.tags.clone()))
    } else {
        Box::new(NoLint)
    }
}

/// Versions of the configured toolchain and linter, failing if either
/// cannot be launched. No execution strategy is prepared.
pub fn tool_versions(config: &GraderConfig) -> Result<Vec<(String, String)>> {
    let toolchain = toolchain_for(&config.build.toolchain)?;
    let linter = linter_for(config);
    Ok(vec![
        (toolchain.name().to_string(), toolchain.version()?),
        ("linter".to_string(), linter.version()?),
    ])
}

/// Sequences all stages of one grading run.
pub struct Pipeline {
    config: GraderConfig,
    collaborators: Collaborators,
}

/// Per-run state shared by the stages.
struct Run<'a> {
    request: &'a GradeRequest,
    workspace: &'a Workspace,
    cache: &'a BinaryCache,
    /// Workspace and cache roots, the only run directories children see
    run_dirs: Vec<PathBuf>,
}

impl Pipeline {
    pub fn new(config: GraderConfig, collaborators: Collaborators) -> Self {
        Self {
            config,
            collaborators,
        }
    }

    /// Grade one submission. `Ok` is a verdict; `Err` means the request was
    /// bad or the grading system failed.
    pub fn run(&self, request: &GradeRequest) -> Result<Verdict> {
        request.validate()?;
        log::info!(
            "grading {} (submission {}, private {})",
            request.problem,
            request.submission_root.display(),
            request.private_root.display()
        );

        let base_dir = &self.config.workspace.base_dir;
        let workspace = Workspace::create(base_dir, &request.problem)?;
        let cache = BinaryCache::create(base_dir)?;

        let outcome = self.execute(&Run {
            request,
            workspace: &workspace,
            cache: &cache,
            run_dirs: vec![workspace.root().to_path_buf(), cache.root().to_path_buf()],
        });

        if let Err(e) = workspace.release() {
            log::warn!("Failed to remove workspace: {}", e);
        }
        if let Err(e) = cache.release() {
            log::warn!("Failed to remove binary cache: {}", e);
        }

        match outcome {
            Ok(()) => {
                log::info!("{}: accepted", request.problem);
                Ok(Verdict::Accepted)
            }
            Err(Halt::Rejected(stage, failure)) => {
                log::info!("{}: rejected at {}: {}", request.problem, stage, failure);
                Ok(Verdict::Rejected { stage, failure })
            }
            Err(Halt::Fatal(err)) => {
                log::error!("{}: {}", request.problem, err);
                Err(err)
            }
        }
    }

    fn execute(&self, run: &Run<'_>) -> std::result::Result<(), Halt> {
        let request = run.request;
        let toolchain = self.collaborators.toolchain.as_ref();

        log::info!("stage {}", Stage::AssembleWorkspace);
        let layers = plan_layers(
            &self.config.overlay,
            &request.submission_root,
            &request.private_root,
            &request.problem,
        );
        self.collaborators
            .materializer
            .materialize(&layers, run.workspace.root())?;

        let requirement = CoverageRequirement::load(
            &request.private_root,
            &request.problem,
            &self.config.overlay.test_file_suffix,
        )?;

        log::info!("stage {}", Stage::BuildArtifacts);
        let packages =
            toolchain.list_packages(run.workspace.root(), &request.problem, &self.config.build.tags)?;
        let cover_packages = if requirement.enabled {
            requirement.import_paths(&packages.module, &request.problem)
        } else {
            Vec::new()
        };
        if packages.tests.is_empty() {
            log::warn!("problem {} has no test packages", request.problem);
        }
        let built = ArtifactBuilder::new(toolchain, &self.config.build.tags).build(
            run.workspace.root(),
            run.cache,
            &packages,
            &cover_packages,
        )?;

        let env = ChildEnv::minimal(
            toolchain.cache_env_var(),
            run.cache.toolchain_cache_dir(),
            &built.registry,
        )?;
        for warning in env.safety_warnings() {
            log::warn!("Child environment: {}", warning);
        }

        let regression = BenchmarkRegression::new(self.config.benchmark.slowdown_tolerance);
        let mut profiles = Vec::new();
        for suite in &built.suites {
            if let Some(profile) = self.test_package(run, suite, &env, &requirement, &regression)? {
                profiles.push(profile);
            }
        }

        if requirement.enabled {
            log::info!("stage {}", Stage::AggregateCoverage);
            log::info!(
                "checking coverage is at least {:.2}%",
                requirement.threshold_percent
            );
            coverage::aggregate(&profiles, requirement.threshold_percent)
                .map_err(|failure| Halt::Rejected(Stage::AggregateCoverage, failure))?;
        }

        log::info!("stage {}", Stage::RunLint);
        match self
            .collaborators
            .linter
            .check(run.workspace.root(), &request.problem)?
        {
            LintVerdict::Pass => Ok(()),
            LintVerdict::Fail(detail) => Err(Halt::Rejected(
                Stage::RunLint,
                SubmissionFailure::Lint { detail },
            )),
        }
    }

    /// Correctness, race and benchmark runs of one package, then the
    /// baseline comparison. Returns the coverage profile, if one was written.
    fn test_package(
        &self,
        run: &Run<'_>,
        suite: &TestSuite,
        env: &ChildEnv,
        requirement: &CoverageRequirement,
        regression: &BenchmarkRegression,
    ) -> std::result::Result<Option<PathBuf>, Halt> {
        let toolchain = self.collaborators.toolchain.as_ref();

        log::info!("testing {}", suite.package);
        let profile = requirement.enabled.then(|| run.cache.profile_path());
        self.run_binary(
            run,
            suite,
            &suite.plain,
            RunKind::Correctness,
            toolchain.run_args(RunKind::Correctness, profile.as_deref()),
            env,
        )?;

        log::info!("testing {} with race detector", suite.package);
        self.run_binary(
            run,
            suite,
            &suite.race,
            RunKind::Race,
            toolchain.run_args(RunKind::Race, None),
            env,
        )?;

        log::info!("benchmarking {}", suite.package);
        let output = self
            .run_binary(
                run,
                suite,
                &suite.plain,
                RunKind::BenchmarkOnly,
                toolchain.run_args(RunKind::BenchmarkOnly, None),
                env,
            )?
            .unwrap_or_default();

        if bench::reports_no_benchmarks(&output) || bench::parse::parse_measurements(&output).is_empty()
        {
            log::info!("{} has no benchmarks, skipping comparison", suite.package);
            return Ok(profile);
        }

        log::info!("comparing {} to baseline", suite.package);
        let baseline = toolchain.baseline_benchmarks(
            &run.request.private_root,
            &suite.package,
            &self.config.build.baseline_tags,
        )?;
        regression
            .evaluate(&baseline, &output)
            .map_err(|failure| Halt::Rejected(Stage::CompareBaseline, failure))?;
        Ok(profile)
    }

    fn run_binary(
        &self,
        run: &Run<'_>,
        suite: &TestSuite,
        artifact: &BuildArtifact,
        kind: RunKind,
        args: Vec<std::ffi::OsString>,
        env: &ChildEnv,
    ) -> std::result::Result<Option<String>, Halt> {
        log::debug!("stage {} for {}", kind.stage(), suite.package);
        let invocation = Invocation {
            package: &suite.package,
            run: kind,
            program: &artifact.path,
            args,
            workdir: run.workspace.root().join(&suite.rel_dir),
            run_dirs: &run.run_dirs,
            env,
            capture_stdout: kind == RunKind::BenchmarkOnly,
        };

        match self.collaborators.executor.run(&invocation) {
            Ok(output) => Ok(output.stdout),
            Err(err @ ExecError::Setup { .. }) => {
                Err(Halt::Fatal(GradeError::Infrastructure(err.to_string())))
            }
            Err(err) => Err(Halt::Rejected(
                kind.stage(),
                SubmissionFailure::RuntimeTest {
                    package: suite.package.clone(),
                    run: kind,
                    cause: err.to_string(),
                },
            )),
        }
    }
}

/// Build the real collaborators and grade one request.
pub fn grade(config: GraderConfig, request: &GradeRequest) -> Result<Verdict> {
    request.validate()?;
    let collaborators = Collaborators::system(&config, &request.private_root)?;
    Pipeline::new(config, collaborators).run(request)
}
