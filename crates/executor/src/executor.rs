//! Step interpreter.
//!
//! Steps run in document order and commands within a step run in order.
//! For each command the step's node set is narrowed by the `when` guard and
//! handed to the dispatcher. The first failing command aborts the run.

use crate::cancel::CancelToken;
use crate::client::{NoRegistry, RegistryClient};
use crate::dispatch::Dispatcher;
use crate::error::{Error, Result};
use crate::params::{GlobalParams, NodeConfig};
use crate::registry::NodeRegistry;
use crate::selector::filter_when;
use crate::spec::{Command, Step, TrustGate, load_spec_from_file};
use crate::template::TemplateOverride;
use serde_json::Value;
use std::path::Path;

/// Observer for run progress.
pub trait Progress {
    fn on_step_start(&mut self, _index: usize, _total: usize, _step: &Step) {}
    fn on_command(&mut self, _command: &Command, _ips: &[&str]) {}
    fn on_command_skipped(&mut self, _command: &Command) {}
    fn on_step_complete(&mut self, _step: &Step) {}
}

/// No-op progress observer.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl Progress for NoProgress {}

/// Counts for a finished run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub steps: usize,
    pub commands_run: usize,
    /// Commands whose guard left no node
    pub commands_skipped: usize,
    pub dry_run: bool,
}

/// Owns the node registry and everything a run needs.
pub struct Executor {
    registry: NodeRegistry,
    params: GlobalParams,
    template: TemplateOverride,
    client: Box<dyn RegistryClient>,
    cancel: CancelToken,
    dry_run: bool,
}

impl Executor {
    /// Build the node registry from `params.nodes`.
    pub fn new(params: GlobalParams, adhoc: Option<Value>) -> Result<Self> {
        let registry = NodeRegistry::build(&params.nodes)?;
        Self::with_registry(registry, params, adhoc)
    }

    /// Use a prepared registry; `params.nodes` is ignored.
    pub fn with_registry(
        registry: NodeRegistry,
        params: GlobalParams,
        adhoc: Option<Value>,
    ) -> Result<Self> {
        let template = TemplateOverride::new(params.to_value()?, adhoc);
        Ok(Self {
            registry,
            params,
            template,
            client: Box::new(NoRegistry),
            cancel: CancelToken::new(),
            dry_run: false,
        })
    }

    pub fn with_client(mut self, client: Box<dyn RegistryClient>) -> Self {
        self.client = client;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Add nodes that are not indexed yet.
    pub fn update_nodes(&mut self, configs: &[NodeConfig]) -> Result<()> {
        self.registry.build_or_update(configs)
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn params(&self) -> &GlobalParams {
        &self.params
    }

    pub fn template(&self) -> &TemplateOverride {
        &self.template
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Load a spec through `trust`, rendered against this run's parameters.
    pub fn load_spec(&self, path: &Path, trust: &TrustGate) -> Result<Vec<Step>> {
        load_spec_from_file(path, &self.template, trust)
    }

    /// Load and run a spec file.
    pub fn run_spec_file(
        &self,
        path: &Path,
        trust: &TrustGate,
        progress: &mut dyn Progress,
    ) -> Result<RunSummary> {
        let steps = self.load_spec(path, trust)?;
        self.run_steps(&steps, progress)
    }

    /// Run `steps` in order, stopping at the first failure.
    pub fn run_steps(&self, steps: &[Step], progress: &mut dyn Progress) -> Result<RunSummary> {
        let mut summary = RunSummary {
            dry_run: self.dry_run,
            ..Default::default()
        };

        for (index, step) in steps.iter().enumerate() {
            progress.on_step_start(index, steps.len(), step);
            let (run, skipped) = self.run_step(step, progress)?;
            summary.steps += 1;
            summary.commands_run += run;
            summary.commands_skipped += skipped;
            progress.on_step_complete(step);
        }

        Ok(summary)
    }

    /// Run one step; returns (commands run, commands skipped).
    fn run_step(&self, step: &Step, progress: &mut dyn Progress) -> Result<(usize, usize)> {
        let dispatcher = Dispatcher::new(
            &self.registry,
            &self.params,
            &self.template,
            self.client.as_ref(),
            &self.cancel,
        )
        .dry_run(self.dry_run);

        let nodes = step.nodes.resolve(&self.registry);
        log::debug!("step {:?}: nodes {:?}", step.name, nodes.ips());

        let mut run = 0;
        let mut skipped = 0;
        for command in &step.commands {
            if self.cancel.is_cancelled() {
                return Err(Error::Interrupted(step.name.clone()));
            }

            let targets = filter_when(&command.when, &nodes, &self.template)?;
            if targets.is_empty() {
                log::info!(
                    "step {:?}: {} skipped, no node matched",
                    step.name,
                    command.kind
                );
                progress.on_command_skipped(command);
                skipped += 1;
                continue;
            }

            progress.on_command(command, &targets.ips());
            dispatcher.dispatch(command, &targets)?;
            run += 1;
        }
        Ok((run, skipped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::LOCAL_IP;
    use crate::selector::NodeSelector;
    use crate::spec::CommandKind;
    use crate::testing::{CallLog, RecordingClient, recorded_node, recorded_registry};
    use tempfile::TempDir;

    fn step(name: &str, all_of: &[&str], commands: Vec<Command>) -> Step {
        Step {
            name: name.to_string(),
            nodes: NodeSelector {
                all_of: all_of.iter().map(|r| (*r).to_string()).collect(),
                ..Default::default()
            },
            commands,
        }
    }

    fn executor(log: &CallLog) -> Executor {
        let params = GlobalParams {
            provider_ip: "10.0.0.1".into(),
            registry_port: "5000".into(),
            user: "admin".into(),
            password: "secret".into(),
            ..Default::default()
        };
        Executor::with_registry(recorded_registry(log), params, None).unwrap()
    }

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl Progress for Recorder {
        fn on_step_start(&mut self, index: usize, total: usize, step: &Step) {
            self.events.push(format!("start {}/{} {}", index + 1, total, step.name));
        }
        fn on_command(&mut self, command: &Command, ips: &[&str]) {
            self.events.push(format!("{} {}", command.kind, ips.join(",")));
        }
        fn on_command_skipped(&mut self, command: &Command) {
            self.events.push(format!("skip {}", command.kind));
        }
    }

    #[test]
    fn test_steps_run_in_order() {
        let log = CallLog::default();
        let executor = executor(&log);
        let steps = vec![
            step(
                "first",
                &["controlplane"],
                vec![Command::new(CommandKind::Shell, &["echo", "one"])],
            ),
            step(
                "second",
                &["worker"],
                vec![Command::new(CommandKind::Shell, &["echo", "two"])],
            ),
        ];

        let mut recorder = Recorder::default();
        let summary = executor.run_steps(&steps, &mut recorder).unwrap();

        assert_eq!(summary.steps, 2);
        assert_eq!(summary.commands_run, 2);
        assert_eq!(
            recorder.events,
            vec![
                "start 1/2 first",
                "shell 10.0.0.11,10.0.0.12",
                "start 2/2 second",
                "shell 10.0.0.21",
            ]
        );
        assert_eq!(log.commands().len(), 3);
    }

    #[test]
    fn test_when_guard_filters_nodes() {
        let log = CallLog::default();
        let executor = executor(&log);
        let steps = vec![step(
            "guarded",
            &["controlplane"],
            vec![
                Command::new(CommandKind::Shell, &["echo", "one"])
                    .when(r#"\{\{ Node.name == "cp-2" \}\}"#),
                Command::new(CommandKind::Shell, &["echo", "never"]).when("false"),
            ],
        )];

        let mut recorder = Recorder::default();
        let summary = executor.run_steps(&steps, &mut recorder).unwrap();

        assert_eq!(summary.commands_run, 1);
        assert_eq!(summary.commands_skipped, 1);
        assert_eq!(
            log.commands(),
            vec![(
                "10.0.0.12".to_string(),
                vec!["echo".to_string(), "one".to_string()]
            )]
        );
        assert_eq!(recorder.events.last().map(String::as_str), Some("skip shell"));
    }

    #[test]
    fn test_malformed_guard_aborts_the_step() {
        let log = CallLog::default();
        let executor = executor(&log);
        let steps = vec![step(
            "bad guard",
            &["worker"],
            vec![Command::new(CommandKind::Shell, &["echo"]).when("maybe")],
        )];

        let err = executor.run_steps(&steps, &mut NoProgress).unwrap_err();
        assert!(matches!(err, Error::WhenNotBool { .. }));
        assert!(log.is_empty());
    }

    #[test]
    fn test_failing_step_stops_the_run() {
        let log = CallLog::default();
        let mut registry = NodeRegistry::new();
        registry.insert(recorded_node("bad", "10.0.0.31", &["edge"], &log, true));
        let executor = Executor::with_registry(registry, GlobalParams::default(), None).unwrap();

        let steps = vec![
            step(
                "fails",
                &["edge"],
                vec![Command::new(CommandKind::Shell, &["false"])],
            ),
            step(
                "never runs",
                &["edge"],
                vec![Command::new(CommandKind::Shell, &["echo", "after"])],
            ),
        ];

        let err = executor.run_steps(&steps, &mut NoProgress).unwrap_err();
        assert!(matches!(err, Error::CommandFailed { .. }));
        assert_eq!(log.commands().len(), 1);
    }

    #[test]
    fn test_cancelled_run_is_interrupted() {
        let log = CallLog::default();
        let cancel = CancelToken::new();
        let executor = executor(&log).with_cancel(cancel.clone());
        cancel.cancel();

        let steps = vec![step(
            "cancelled",
            &["worker"],
            vec![Command::new(CommandKind::Shell, &["echo"])],
        )];
        let err = executor.run_steps(&steps, &mut NoProgress).unwrap_err();
        assert!(matches!(err, Error::Interrupted(_)));
        assert!(log.is_empty());
    }

    #[test]
    fn test_dry_run_touches_nothing() {
        let log = CallLog::default();
        let client = RecordingClient::default();
        let executor = executor(&log)
            .with_client(Box::new(client.clone()))
            .dry_run(true);

        let steps = vec![
            step(
                "shell",
                &["controlplane"],
                vec![Command::new(CommandKind::Shell, &["reboot"])],
            ),
            step(
                "images",
                &["day-0"],
                vec![Command::new(CommandKind::PushImage, &["pause:3.9"])],
            ),
        ];
        let summary = executor.run_steps(&steps, &mut NoProgress).unwrap();

        assert!(summary.dry_run);
        assert_eq!(summary.commands_run, 2);
        assert!(log.is_empty());
        assert!(client.entries().is_empty());
    }

    #[test]
    fn test_run_spec_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("spec.yaml");
        std::fs::write(
            &path,
            r#"
spec:
  steps:
    - name: files
      nodes:
        anyOf: [day-0]
      commands:
        - type: pullFile
          cmd: [/usr/local/bin/helm, helm]
"#,
        )
        .unwrap();

        let log = CallLog::default();
        let client = RecordingClient::default();
        let executor = executor(&log).with_client(Box::new(client.clone()));
        let summary = executor
            .run_spec_file(&path, &TrustGate::open(), &mut NoProgress)
            .unwrap();

        assert_eq!(summary.commands_run, 1);
        assert_eq!(
            client.entries(),
            vec!["pullFile /usr/local/bin/helm oci://10.0.0.1:5000/edgekit/helm:0.0.0"]
        );
        assert_eq!(executor.registry().day0().ip, LOCAL_IP);
    }

    #[test]
    fn test_new_builds_registry_from_params() {
        let params = GlobalParams::from_yaml_str(
            r#"
nodes:
  - name: cp-1
    ip: 10.0.0.11
    user: root
    sshPasswd: pw
    role: [controlplane]
"#,
        )
        .unwrap();
        let mut executor = Executor::new(params, None).unwrap();
        assert_eq!(executor.registry().len(), 2);

        executor
            .update_nodes(&[NodeConfig {
                name: "w".into(),
                ip: "10.0.0.21".into(),
                user: "root".into(),
                ssh_passwd: "pw".into(),
                ..Default::default()
            }])
            .unwrap();
        assert_eq!(executor.registry().len(), 3);
    }
}
