//! CLI command definitions and handlers.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Result, eyre};
use tokio::sync::{broadcast, watch};

use crate::config::DriverConfig;
use crate::driver::Driver;
use crate::filesystem::SystemMounter;
use crate::identity::IdentityServer;
use crate::metadata::{Output, OutputFormat};
use crate::node::request::{CONCATENATED_FILES_KEY, OPENSSL_REHASH_KEY};
use crate::node::{PublishRequest, UnpublishRequest};
use crate::projection::{AtomicWriter, WriteOutcome};
use crate::reconcile::Reconciler;
use crate::render::{BundleRenderer, parse_bundle};
use crate::source::DirectoryBundleSource;

/// trust-csi - trust bundle projection for pod volumes
#[derive(Parser)]
#[command(name = "trust-csi")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Root directory for driver data
    #[arg(
        long,
        global = true,
        env = "TRUST_CSI_DATA_ROOT",
        default_value = "/var/run/trust-csi"
    )]
    pub data_root: PathBuf,

    /// ID of the node this agent runs on
    #[arg(long, global = true, env = "TRUST_CSI_NODE_ID", default_value = "")]
    pub node_id: String,

    /// Name reported as the CSI driver name
    #[arg(
        long,
        global = true,
        env = "TRUST_CSI_DRIVER_NAME",
        default_value = crate::config::DEFAULT_DRIVER_NAME
    )]
    pub driver_name: String,

    /// Directory holding bundles as <namespace>/<bundle> files
    #[arg(
        long,
        global = true,
        env = "TRUST_CSI_BUNDLE_DIR",
        default_value = crate::source::DEFAULT_BUNDLE_DIR
    )]
    pub bundle_dir: PathBuf,

    /// Keep volumes on the data root's filesystem instead of a tmpfs
    #[arg(long, global = true)]
    pub no_tmpfs: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ListFormat {
    /// Tab separated columns.
    #[default]
    Table,
    /// JSON array of records.
    Json,
}

/// Driver commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Publish an inline volume at a target path
    Publish {
        /// Volume ID
        volume_id: String,

        /// Path to mount the volume at
        target_path: PathBuf,

        /// Namespace of the consuming pod
        #[arg(long)]
        namespace: String,

        /// Bundle to project
        #[arg(long)]
        bundle: String,

        /// Comma separated concatenated file paths
        #[arg(long)]
        concatenated_files: Option<String>,

        /// Comma separated OpenSSL rehash directories
        #[arg(long)]
        openssl_rehash: Option<String>,

        /// Group owning the rendered files
        #[arg(long)]
        mount_group: Option<String>,
    },

    /// Unpublish a volume
    Unpublish {
        /// Volume ID
        volume_id: String,

        /// Path the volume is mounted at
        target_path: PathBuf,
    },

    /// Resync tracked volumes once
    Sync {
        /// Only resync volumes tracking this bundle
        bundle: Option<String>,
    },

    /// List tracked volumes
    List {
        /// Only list volumes tracking this bundle
        #[arg(long)]
        bundle: Option<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t)]
        format: ListFormat,

        /// Only display volume IDs
        #[arg(short, long)]
        quiet: bool,
    },

    /// Print the OpenSSL subject hash of each certificate in a PEM file
    Hash {
        /// PEM file
        pem_file: PathBuf,
    },

    /// Project a PEM bundle into a directory
    Render {
        /// PEM file
        pem_file: PathBuf,

        /// Concatenated file path inside the directory
        #[arg(long)]
        concatenated: Vec<String>,

        /// Rehash directory inside the directory
        #[arg(long)]
        rehash: Vec<String>,

        /// Group owning the rendered files
        #[arg(long)]
        gid: Option<u32>,

        /// Directory to project into
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Watch bundles and keep tracked volumes in sync
    Run {
        /// Poll interval in seconds
        #[arg(long, default_value = "30")]
        interval: u64,
    },

    /// Show driver identity
    Info,
}

impl Cli {
    /// Driver configuration from the global flags.
    #[must_use]
    pub fn config(&self) -> DriverConfig {
        let config = DriverConfig::default()
            .with_node_id(self.node_id.clone())
            .with_driver_name(self.driver_name.clone())
            .with_root(self.data_root.clone())
            .with_bundle_dir(self.bundle_dir.clone());
        if self.no_tmpfs {
            config.without_tmpfs()
        } else {
            config
        }
    }

    fn driver(&self, config: DriverConfig) -> Result<Driver> {
        let source = Arc::new(DirectoryBundleSource::new(config.bundle_dir.clone()));
        Ok(Driver::initialize(config, source, Arc::new(SystemMounter))?)
    }

    /// Execute the CLI command.
    pub async fn execute(self) -> Result<()> {
        let config = self.config();

        match &self.command {
            Commands::Publish {
                volume_id,
                target_path,
                namespace,
                bundle,
                concatenated_files,
                openssl_rehash,
                mount_group,
            } => {
                let mut request =
                    PublishRequest::ephemeral(volume_id.clone(), target_path.clone(), namespace, bundle);
                if let Some(files) = concatenated_files {
                    request = request.with_attribute(CONCATENATED_FILES_KEY, files.clone());
                }
                if let Some(dirs) = openssl_rehash {
                    request = request.with_attribute(OPENSSL_REHASH_KEY, dirs.clone());
                }
                if let Some(group) = mount_group {
                    request = request.with_mount_group(group.clone());
                }

                let driver = self.driver(config)?;
                driver.node().publish(&request)?;
                println!("Volume {volume_id} published at {}", target_path.display());
                Ok(())
            }

            Commands::Unpublish {
                volume_id,
                target_path,
            } => {
                let driver = self.driver(config)?;
                driver.node().unpublish(&UnpublishRequest {
                    volume_id: volume_id.clone(),
                    target_path: target_path.clone(),
                })?;
                println!("Volume {volume_id} unpublished");
                Ok(())
            }

            Commands::Sync { bundle } => {
                let driver = self.driver(config)?;
                let reconciler = driver.reconciler();
                let synced = match bundle {
                    Some(bundle) => reconciler.reconcile(bundle)?,
                    None => reconciler.reconcile_all()?,
                };
                println!("Synced {synced} volumes");
                Ok(())
            }

            Commands::List {
                bundle,
                format,
                quiet,
            } => {
                let driver = self.driver(config)?;
                let state = driver.state();
                let records: Vec<_> = match bundle {
                    Some(bundle) => state.metadata_for_bundle(bundle),
                    None => state
                        .volume_ids()
                        .iter()
                        .filter_map(|id| state.get(id))
                        .collect(),
                };

                if *quiet {
                    for record in &records {
                        println!("{}", record.volume_id);
                    }
                } else if *format == ListFormat::Json {
                    println!("{}", serde_json::to_string_pretty(&records)?);
                } else {
                    println!("VOLUME\tNAMESPACE\tBUNDLE\tOUTPUTS");
                    for record in &records {
                        let outputs: Vec<String> = record
                            .outputs
                            .iter()
                            .map(|o| format!("{}:{}", o.format, o.path))
                            .collect();
                        println!(
                            "{}\t{}\t{}\t{}",
                            record.volume_id,
                            record.pod_namespace,
                            record.bundle,
                            outputs.join(",")
                        );
                    }
                }
                Ok(())
            }

            Commands::Hash { pem_file } => {
                let data = std::fs::read(pem_file)?;
                for cert in parse_bundle(&data)? {
                    println!("{}  {}", cert.subject_hash, cert.subject);
                }
                Ok(())
            }

            Commands::Render {
                pem_file,
                concatenated,
                rehash,
                gid,
                out,
            } => {
                let outputs: Vec<Output> = concatenated
                    .iter()
                    .map(|path| (OutputFormat::ConcatenatedFile, path))
                    .chain(rehash.iter().map(|path| (OutputFormat::OpensslRehash, path)))
                    .map(|(format, path)| Output {
                        format,
                        path: crate::node::request::clean_absolute(path),
                        uid: None,
                        gid: *gid,
                    })
                    .collect();
                if outputs.is_empty() {
                    return Err(eyre!("At least one --concatenated or --rehash output is required"));
                }

                let data = std::fs::read(pem_file)?;
                let payload = BundleRenderer::new().render(&data, &outputs)?;
                std::fs::create_dir_all(out)?;

                match AtomicWriter::new(out.clone())?.write(&payload, None)? {
                    WriteOutcome::Published { snapshot } => {
                        println!("Wrote {} files to {} ({snapshot})", payload.len(), out.display());
                    }
                    WriteOutcome::Unchanged => println!("{} is up to date", out.display()),
                }
                Ok(())
            }

            Commands::Run { interval } => {
                let config = config.with_resync_interval(Duration::from_secs((*interval).max(1)));
                let driver = self.driver(config)?;
                run_daemon(&driver).await
            }

            Commands::Info => {
                let info = IdentityServer::new(&config).plugin_info()?;
                let json = serde_json::json!({
                    "name": info.name,
                    "vendorVersion": info.vendor_version,
                    "nodeId": config.node_id,
                    "dataRoot": config.paths.root,
                    "bundleDir": config.bundle_dir,
                });
                println!("{}", serde_json::to_string_pretty(&json)?);
                Ok(())
            }
        }
    }
}

async fn reconcile_blocking(reconciler: &Reconciler, bundle: Option<String>) {
    let reconciler = reconciler.clone();
    let result = tokio::task::spawn_blocking(move || match &bundle {
        Some(bundle) => reconciler.reconcile(bundle),
        None => reconciler.reconcile_all(),
    })
    .await;

    match result {
        Ok(Ok(synced)) => tracing::info!(synced, "Reconcile finished"),
        Ok(Err(errors)) => tracing::warn!(failed = errors.len(), error = %errors, "Reconcile had failures"),
        Err(e) => tracing::warn!(error = %e, "Reconcile task failed"),
    }
}

async fn run_daemon(driver: &Driver) -> Result<()> {
    tracing::info!(
        interval = ?driver.config().resync_interval,
        "Starting bundle watch loop"
    );

    reconcile_blocking(driver.reconciler(), None).await;

    let watcher = driver.watcher();
    let mut events = watcher.subscribe();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watch_task = tokio::spawn(watcher.run(shutdown_rx));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    tracing::info!(?event, "Bundle changed");
                    reconcile_blocking(driver.reconciler(), Some(event.bundle().to_string())).await;
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Missed bundle events, resyncing everything");
                    reconcile_blocking(driver.reconciler(), None).await;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = &mut ctrl_c => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    let _ = shutdown_tx.send(true);
    watch_task.await?;
    Ok(())
}
