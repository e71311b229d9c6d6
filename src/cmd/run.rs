use clap::Args;
use color_eyre::eyre::{Result, WrapErr, eyre};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tackle_controller::generators::{HELLO_WORLD_TEMPLATE, generate_hardware, generate_template};
use tackle_controller::{
    Controller, ControllerConfig, MemoryStore, MemoryWorkflowClient, ResourceStore,
};
use tackle_crd::Workflow;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const TEMPLATE_NAME: &str = "hello-world";
const TEMPLATE_REMOTE_ID: &str = "tpl-hello-world";

#[derive(Args, Debug)]
pub struct RunArgs {
    /// YAML controller configuration
    #[arg(long, env = "TACKLE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Number of workflows to seed
    #[arg(long, env = "TACKLE_WORKFLOWS", default_value_t = 3)]
    pub workflows: usize,

    /// How often the simulated remote service makes progress, in milliseconds
    #[arg(long, env = "TACKLE_TICK_MS", default_value_t = 500)]
    pub tick_ms: u64,

    /// Number of reconcile workers
    #[arg(long, env = "TACKLE_WORKERS")]
    pub workers: Option<usize>,

    /// Status poll interval in seconds (defaults to the tick when no config file sets it)
    #[arg(long, env = "TACKLE_REQUEUE_SECS")]
    pub requeue_secs: Option<u64>,

    /// Per-pass reconcile deadline in seconds
    #[arg(long, env = "TACKLE_RECONCILE_TIMEOUT_SECS")]
    pub reconcile_timeout_secs: Option<u64>,
}

impl RunArgs {
    fn controller_config(&self) -> Result<ControllerConfig> {
        if self.tick_ms == 0 {
            return Err(eyre!("--tick-ms must be positive"));
        }

        let mut config = match &self.config {
            Some(path) => ControllerConfig::from_file(path)
                .wrap_err_with(|| format!("failed to load {}", path.display()))?,
            None => ControllerConfig::default()
                .with_requeue_interval(Duration::from_millis(self.tick_ms)),
        };

        if let Some(workers) = self.workers {
            config = config.with_workers(workers);
        }
        if let Some(secs) = self.requeue_secs {
            config = config.with_requeue_interval(Duration::from_secs(secs));
        }
        if let Some(secs) = self.reconcile_timeout_secs {
            config = config.with_reconcile_timeout(Duration::from_secs(secs));
        }
        config.validate()?;
        Ok(config)
    }
}

pub async fn run(args: RunArgs) -> Result<()> {
    let config = args.controller_config()?;
    info!(
        workflows = args.workflows,
        workers = config.workers,
        requeue_interval = ?config.requeue_interval,
        "Starting tackle"
    );

    let store = Arc::new(MemoryStore::new());
    let client = Arc::new(MemoryWorkflowClient::new());
    seed(&store, &client, args.workflows).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let controller = Controller::new(store.clone(), client.clone(), config);
    let running = tokio::spawn(async move { controller.run(shutdown_rx).await });

    let ctrl_c_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received, shutting down");
            let _ = ctrl_c_tx.send(true);
        }
    });

    let completed = drive(
        &store,
        &client,
        Duration::from_millis(args.tick_ms),
        shutdown_tx.subscribe(),
    )
    .await?;

    // Receiver may be gone already if the controller exited on its own
    let _ = shutdown_tx.send(true);
    running.await??;

    println!("{} of {} workflows completed", completed, args.workflows);
    Ok(())
}

async fn seed(store: &MemoryStore, client: &MemoryWorkflowClient, count: usize) -> Result<()> {
    let mut template = generate_template(TEMPLATE_NAME, HELLO_WORLD_TEMPLATE);
    template.set_remote_id(TEMPLATE_REMOTE_ID);
    store.put_template(&template).await?;
    client
        .register_template(TEMPLATE_REMOTE_ID, HELLO_WORLD_TEMPLATE)
        .await;

    for i in 0..count {
        let hardware = generate_hardware(&format!("machine-{}", i), 1)?;
        let hardware_id = hardware
            .remote_id()
            .ok_or_else(|| eyre!("generated hardware has no id"))?;
        client.register_hardware(hardware_id).await;
        store.put_hardware(&hardware).await?;

        let workflow = Workflow::new(
            format!("wf-{}", i),
            hardware.metadata.name.clone(),
            TEMPLATE_NAME,
        );
        store.create_workflow(&workflow).await?;
        debug!(workflow = %workflow.name(), hardware_id = %hardware_id, "Seeded workflow");
    }
    Ok(())
}

/// Advance remote executions each tick and delete workflows once they succeed
///
/// Returns the number of workflows that succeeded before every workflow
/// was gone or shutdown was requested.
async fn drive(
    store: &MemoryStore,
    client: &MemoryWorkflowClient,
    tick: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Result<usize> {
    let mut interval = tokio::time::interval(tick);
    let mut completed = 0;

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return Ok(completed);
                }
            }
        }

        let workflows = store.list_workflows().await?;
        if workflows.is_empty() {
            info!("All workflows removed");
            return Ok(completed);
        }

        for workflow in workflows {
            if workflow.metadata.is_being_deleted() {
                continue;
            }
            let Some(remote_id) = workflow.remote_id() else {
                continue;
            };

            if workflow.is_succeeded() {
                info!(workflow = %workflow.name(), "Workflow succeeded, deleting");
                store.delete_workflow(workflow.name()).await?;
                completed += 1;
                continue;
            }

            match client.advance(remote_id).await {
                Ok(state) => debug!(workflow = %workflow.name(), state = %state, "Remote progress"),
                Err(e) => warn!(workflow = %workflow.name(), error = %e, "Failed to advance"),
            }
        }
    }
}
