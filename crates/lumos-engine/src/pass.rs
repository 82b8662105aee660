//! The weaving pass
//!
//! 1. discover class files and parse them in parallel
//! 2. resolve targets once over the whole set
//! 3. per unit, in parallel: locate, plan, weave, verify
//! 4. write back the units that reached `Verified`
//!
//! A unit that fails keeps its original bytes. Because its own targets keep
//! their original signatures, calls to them from other units must not be
//! rewritten either: the targets of failed units are blocked and the units
//! calling them are planned again, until no new target gets blocked.

use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lumos_locator::{locate, SourceIndex};
use lumos_model::{
    CompilationUnit, MatchOrigin, MethodKey, RewritePlan, UnitOutcome, UnitState, WeaveError,
};
use lumos_resolver::{resolve, Resolution, ResolveOptions};
use lumos_verifier::{ConsistencyVerifier, Verifier};
use lumos_weaver::{build_plan, runtime_classes, weave, WeaveOptions};
use rayon::prelude::*;
use serde::Serialize;

use crate::abort::AbortFlag;
use crate::config::Config;
use crate::discovery::{discover, Artifacts};
use crate::error::{ConfigError, EngineError};
use crate::report::{DeferredSite, Diagnostic, PassReport, UnitReport};

/// Result of processing one unit
struct UnitRun {
    state: UnitState,
    outcome: UnitOutcome,
    plan: Option<RewritePlan>,
    woven: Option<Vec<u8>>,
}

/// Walks one unit through its states, logging each transition
struct Tracker<'a> {
    unit: &'a str,
    state: UnitState,
}

impl<'a> Tracker<'a> {
    fn new(unit: &'a str) -> Self {
        Self {
            unit,
            state: UnitState::Scanned,
        }
    }

    fn advance(&mut self, next: UnitState) {
        debug_assert!(self.state.allows(next), "{} -> {next} is not a legal transition", self.state);
        tracing::debug!(unit = self.unit, from = %self.state, to = %next, "unit state");
        self.state = next;
    }

    fn fail(mut self, err: WeaveError, plan: Option<RewritePlan>) -> UnitRun {
        self.advance(UnitState::RewriteFailed);
        tracing::warn!(unit = self.unit, code = err.code(), "{err}");
        UnitRun {
            state: self.state,
            outcome: UnitOutcome::RewriteFailed {
                code: err.code().to_string(),
                reason: err.to_string(),
            },
            plan,
            woven: None,
        }
    }
}

/// Parsed input set
struct Loaded {
    units: Vec<CompilationUnit>,
    /// Class files that did not parse
    malformed: Vec<(String, WeaveError)>,
}

/// Targets and call sites a pass would touch, without weaving
#[derive(Debug, Clone, Default, Serialize)]
pub struct Survey {
    pub targets: Vec<TargetEntry>,
    pub call_sites: Vec<CallSiteEntry>,
    pub warnings: Vec<Diagnostic>,
    pub errors: Vec<Diagnostic>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetEntry {
    pub unit: String,
    pub method: String,
    pub descriptor: String,
    pub woven_descriptor: String,
    pub name: String,
    pub origin: MatchOrigin,
    pub already_woven: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallSiteEntry {
    pub unit: String,
    pub caller: String,
    pub pc: u32,
    pub line: u32,
    pub target: String,
    pub recursive: bool,
}

pub struct Engine {
    config: Config,
    verifier: Arc<dyn Verifier>,
    abort: AbortFlag,
}

impl Engine {
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        config.validate()?;
        let verifier = Arc::new(ConsistencyVerifier::new(config.metadata_class()));
        Ok(Self {
            config,
            verifier,
            abort: AbortFlag::new(),
        })
    }

    /// Replace the post-weave verifier
    pub fn with_verifier(mut self, verifier: Arc<dyn Verifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn with_abort_flag(mut self, abort: AbortFlag) -> Self {
        self.abort = abort;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn abort_flag(&self) -> AbortFlag {
        self.abort.clone()
    }

    fn thread_pool(&self) -> Result<rayon::ThreadPool, EngineError> {
        let mut builder = rayon::ThreadPoolBuilder::new().thread_name(|i| format!("lumos-{i}"));
        if let Some(threads) = self.config.threads {
            builder = builder.num_threads(threads);
        }
        builder.build().map_err(|e| EngineError::ThreadPool(e.to_string()))
    }

    fn resolve_options(&self) -> ResolveOptions {
        ResolveOptions {
            metadata_class: self.config.metadata_class(),
            marker_annotation: Some(self.config.marker_annotation()),
        }
    }

    fn load(&self, artifacts: &Artifacts) -> Result<Loaded, EngineError> {
        let parsed: Vec<Result<CompilationUnit, WeaveError>> = artifacts
            .classes
            .par_iter()
            .map(|path| {
                let full = artifacts.path_of(path);
                let bytes = fs::read(&full).map_err(|e| EngineError::io(&full, e))?;
                Ok(CompilationUnit::parse(path.clone(), bytes))
            })
            .collect::<Result<_, EngineError>>()?;

        let mut loaded = Loaded {
            units: Vec::with_capacity(parsed.len()),
            malformed: Vec::new(),
        };
        for (path, result) in artifacts.classes.iter().zip(parsed) {
            match result {
                Ok(unit) => loaded.units.push(unit),
                Err(err) => {
                    tracing::warn!(unit = %path, "{err}");
                    loaded.malformed.push((path.clone(), err));
                }
            }
        }
        Ok(loaded)
    }

    /// Run a full pass over the class files under `input`
    pub fn run(&self, input: &Path) -> Result<PassReport, EngineError> {
        let artifacts = discover(input)?;
        let pool = self.thread_pool()?;
        tracing::info!(
            input = %input.display(),
            classes = artifacts.classes.len(),
            targets = self.config.targets.len(),
            "starting weaving pass"
        );

        let loaded = pool.install(|| self.load(&artifacts))?;
        let resolution = resolve(&loaded.units, &self.config.targets, &self.resolve_options());
        let sources = SourceIndex::build(&self.config.source_roots);
        let runs = pool.install(|| self.weave_units(&loaded.units, &resolution, &sources));

        let mut report = PassReport {
            warnings: resolution.warnings().iter().map(Diagnostic::from).collect(),
            errors: resolution.errors().iter().map(Diagnostic::from).collect(),
            targets: resolution.len(),
            ..Default::default()
        };
        for (unit, run) in loaded.units.iter().zip(&runs) {
            let deferred = run
                .plan
                .iter()
                .flat_map(|p| &p.deferred)
                .map(|d| DeferredSite {
                    caller: d.site.caller_name.clone(),
                    pc: d.site.pc,
                    line: d.site.line,
                    reason: d.reason.describe().to_string(),
                })
                .collect();
            report.units.push(UnitReport {
                unit: unit.path.clone(),
                state: run.state,
                outcome: run.outcome.clone(),
                deferred,
            });
        }
        for (path, err) in &loaded.malformed {
            report.units.push(UnitReport {
                unit: path.clone(),
                state: UnitState::RewriteFailed,
                outcome: UnitOutcome::RewriteFailed {
                    code: err.code().to_string(),
                    reason: err.to_string(),
                },
                deferred: Vec::new(),
            });
        }
        report.units.sort_by(|a, b| a.unit.cmp(&b.unit));

        if self.abort.is_aborted() {
            tracing::warn!("pass aborted before write-back; no files were changed");
            report.aborted = true;
            return Ok(report);
        }
        report.written = self.write_back(&artifacts, &loaded.units, &runs)?;
        tracing::info!("{}", report.summary());
        Ok(report)
    }

    fn weave_units(&self, units: &[CompilationUnit], resolution: &Resolution, sources: &SourceIndex) -> Vec<UnitRun> {
        let options = WeaveOptions {
            metadata_class: self.config.metadata_class(),
        };
        let mut blocked: HashSet<MethodKey> = HashSet::new();
        let mut runs: Vec<Option<UnitRun>> = units.iter().map(|_| None).collect();
        let mut pending: Vec<usize> = (0..units.len()).collect();

        for round in 1.. {
            let results: Vec<(usize, UnitRun)> = pending
                .par_iter()
                .map(|&i| (i, self.process(&units[i], resolution, sources, &blocked, &options)))
                .collect();
            for (i, run) in results {
                runs[i] = Some(run);
            }

            let mut grown = false;
            for (unit, run) in units.iter().zip(&runs) {
                let failed = run.as_ref().is_some_and(|r| !r.outcome.is_success());
                if !failed {
                    continue;
                }
                // Methods related by overriding keep their signatures together
                for target in resolution.targets_in(&unit.path) {
                    if !target.needs_signature_edit() || resolution.is_blocked(&target.key) {
                        continue;
                    }
                    for key in resolution.family(&target.key) {
                        if resolution.target(key).is_some_and(|t| t.needs_signature_edit()) {
                            grown |= blocked.insert(*key);
                        }
                    }
                }
            }
            if !grown {
                break;
            }

            pending = runs
                .iter()
                .enumerate()
                .filter(|(_, run)| {
                    run.as_ref().is_some_and(|r| {
                        r.outcome.is_success()
                            && r.plan.as_ref().is_some_and(|p| {
                                p.calls.iter().any(|c| blocked.contains(&c.site.target))
                                    || p.signature_edits.iter().any(|e| blocked.contains(&e.key))
                            })
                    })
                })
                .map(|(i, _)| i)
                .collect();
            if pending.is_empty() {
                break;
            }
            tracing::debug!(round, units = pending.len(), "replanning units that touch blocked targets");
        }

        units
            .iter()
            .zip(runs)
            .map(|(unit, run)| {
                run.unwrap_or_else(|| {
                    Tracker::new(&unit.path).fail(
                        WeaveError::Aborted {
                            unit: unit.path.clone(),
                        },
                        None,
                    )
                })
            })
            .collect()
    }

    fn process(
        &self,
        unit: &CompilationUnit,
        resolution: &Resolution,
        sources: &SourceIndex,
        blocked: &HashSet<MethodKey>,
        options: &WeaveOptions,
    ) -> UnitRun {
        let mut tracker = Tracker::new(&unit.path);
        let aborted = || WeaveError::Aborted {
            unit: unit.path.clone(),
        };
        if self.abort.is_aborted() {
            return tracker.fail(aborted(), None);
        }

        let plan = match locate(unit, resolution).and_then(|sites| build_plan(unit, sites, resolution, sources, blocked)) {
            Ok(plan) => plan,
            Err(err) => return tracker.fail(err, None),
        };
        tracker.advance(UnitState::PlanBuilt);
        if self.abort.is_aborted() {
            return tracker.fail(aborted(), Some(plan));
        }

        let woven = match weave(unit, &plan, options) {
            Ok(bytes) => bytes,
            Err(err) => return tracker.fail(err, Some(plan)),
        };
        tracker.advance(UnitState::Woven);

        match self.verifier.verify(unit, &woven, &plan) {
            Ok(()) => {
                tracker.advance(UnitState::Verified);
                UnitRun {
                    state: tracker.state,
                    outcome: UnitOutcome::Verified {
                        signatures: plan.signature_edits.len(),
                        call_sites: plan.calls.len(),
                        deferred: plan.deferred.len(),
                    },
                    plan: Some(plan),
                    woven: Some(woven),
                }
            }
            Err(err) => {
                tracker.advance(UnitState::VerificationFailed);
                tracing::warn!(unit = %unit.path, code = err.code(), "{err}");
                tracker.advance(UnitState::RolledBack);
                UnitRun {
                    state: tracker.state,
                    outcome: UnitOutcome::VerificationFailed {
                        code: err.code().to_string(),
                        reason: err.to_string(),
                    },
                    plan: Some(plan),
                    woven: None,
                }
            }
        }
    }

    fn write_back(&self, artifacts: &Artifacts, units: &[CompilationUnit], runs: &[UnitRun]) -> Result<usize, EngineError> {
        let mut written = 0;
        let woven: Vec<(&str, &[u8])> = units
            .iter()
            .zip(runs)
            .filter(|(_, run)| run.outcome.is_modified())
            .filter_map(|(unit, run)| Some((unit.path.as_str(), run.woven.as_deref()?)))
            .collect();

        let root = match &self.config.output {
            Some(output) => {
                for relative in artifacts.classes.iter().chain(&artifacts.resources) {
                    if woven.iter().any(|(path, _)| *path == relative.as_str()) {
                        continue;
                    }
                    let dest = output.join(relative);
                    create_parent(&dest)?;
                    fs::copy(artifacts.path_of(relative), &dest).map_err(|e| EngineError::io(&dest, e))?;
                }
                output.clone()
            }
            None => artifacts.root.clone(),
        };

        for (relative, bytes) in &woven {
            write_atomic(&root.join(relative), bytes)?;
            written += 1;
        }
        if self.config.emit_runtime {
            written += emit_runtime(&self.config, &root)?.len();
        }
        Ok(written)
    }

    /// Resolve and locate without weaving
    pub fn survey(&self, input: &Path) -> Result<Survey, EngineError> {
        let artifacts = discover(input)?;
        let pool = self.thread_pool()?;
        let loaded = pool.install(|| self.load(&artifacts))?;
        let resolution = resolve(&loaded.units, &self.config.targets, &self.resolve_options());

        let mut survey = Survey {
            warnings: resolution.warnings().iter().map(Diagnostic::from).collect(),
            errors: resolution.errors().iter().map(Diagnostic::from).collect(),
            ..Default::default()
        };
        survey.errors.extend(loaded.malformed.iter().map(|(_, e)| Diagnostic::from(e)));

        for target in resolution.targets() {
            let method = loaded
                .units
                .iter()
                .find(|u| u.path == target.unit)
                .and_then(|u| u.methods.get(target.method_index))
                .map(|m| m.name.clone())
                .unwrap_or_default();
            survey.targets.push(TargetEntry {
                unit: target.unit.clone(),
                method,
                descriptor: target.original_descriptor.clone(),
                woven_descriptor: target.woven_descriptor.clone(),
                name: target.target_name.clone(),
                origin: target.origin,
                already_woven: target.already_woven,
            });
        }

        let located: Vec<_> = pool.install(|| {
            loaded
                .units
                .par_iter()
                .map(|unit| (unit, locate(unit, &resolution)))
                .collect()
        });
        for (unit, result) in located {
            match result {
                Ok(sites) => survey.call_sites.extend(sites.into_iter().map(|site| CallSiteEntry {
                    unit: unit.path.clone(),
                    caller: site.caller_name,
                    pc: site.pc,
                    line: site.line,
                    target: resolution
                        .target(&site.target)
                        .map(|t| t.target_name.clone())
                        .unwrap_or_default(),
                    recursive: site.recursive,
                })),
                Err(err) => survey.errors.push(Diagnostic::from(&err)),
            }
        }
        Ok(survey)
    }
}

fn create_parent(path: &Path) -> Result<(), EngineError> {
    match path.parent() {
        Some(dir) => fs::create_dir_all(dir).map_err(|e| EngineError::io(dir, e)),
        None => Ok(()),
    }
}

/// Replace `path` with `bytes` through a temporary file in the same directory
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), EngineError> {
    create_parent(path)?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut file = tempfile::NamedTempFile::new_in(dir).map_err(|e| EngineError::io(dir, e))?;
    file.write_all(bytes).map_err(|e| EngineError::io(path, e))?;
    file.persist(path).map_err(|e| EngineError::io(path, e.error))?;
    Ok(())
}

/// Write the runtime classes under `dir`, returning their paths
pub fn emit_runtime(config: &Config, dir: &Path) -> Result<Vec<PathBuf>, EngineError> {
    let marker = config.marker_annotation();
    let mut paths = Vec::new();
    for class in runtime_classes(&config.metadata_class(), Some(marker.as_str()))? {
        let path = dir.join(class.relative_path());
        write_atomic(&path, &class.bytes)?;
        tracing::debug!(path = %path.display(), "emitted runtime class");
        paths.push(path);
    }
    Ok(paths)
}
