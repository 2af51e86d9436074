use crate::cli::{Cli, Commands, Rmi, Target};
use anyhow::{Context, Result, bail};
use dockhand_core::operation::RemoveImages;
use dockhand_core::{
    GlobalConfig, LogOptions, OperationKind, OperationOptions, OperationRequest, OperationResult,
    ProgressTracker, Project, Service,
};
use dockhand_engine::config_loader::ConfigLoader;
use dockhand_engine::{
    CommandExecutor, DockerRuntime, OperationEngine, OperationStream, StateDiscovery,
};
use dockhand_utils::ProjectScanner;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config).await?;

    if let Commands::Scan { roots, depth, json } = cli.command {
        return scan(&config, roots, depth, json).await;
    }
    let engine = connect(&config)?;
    let scanner = ProjectScanner::from_config(&config.scan);
    dispatch(&engine, &scanner, cli.command).await
}

async fn load_config(path: Option<PathBuf>) -> Result<GlobalConfig> {
    let loader = match path {
        Some(path) => ConfigLoader::load_from(path, |key| std::env::var(key).ok()).await?,
        None => ConfigLoader::load().await?,
    };
    debug!("Configuration from {}", loader.global_path.display());
    Ok(loader.global)
}

fn connect(config: &GlobalConfig) -> Result<OperationEngine> {
    let runtime = DockerRuntime::connect(config.runtime.timeout())
        .context("Failed to set up the Docker API client")?;
    let discovery = Arc::new(StateDiscovery::from_config(Arc::new(runtime), config));
    let executor = Arc::new(CommandExecutor::from_config(&config.compose));
    Ok(OperationEngine::from_config(
        executor,
        discovery,
        &config.compose,
    ))
}

async fn scan(
    config: &GlobalConfig,
    roots: Vec<PathBuf>,
    depth: Option<usize>,
    json: bool,
) -> Result<()> {
    let mut scan_config = config.scan.clone();
    if let Some(depth) = depth {
        scan_config.max_depth = depth;
    }
    let roots = if !roots.is_empty() {
        roots
    } else if !scan_config.roots.is_empty() {
        scan_config.roots.clone()
    } else {
        vec![PathBuf::from(".")]
    };

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let projects = ProjectScanner::from_config(&scan_config)
        .scan(&roots, &cancel)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&projects)?);
        return Ok(());
    }
    if projects.is_empty() {
        println!("No compose projects found.");
    }
    for project in &projects {
        println!(
            "{:<24} {} ({} compose file(s), {} env file(s))",
            project.name,
            project.path.display(),
            project.compose_files.len(),
            project.env_files.len()
        );
    }
    Ok(())
}

async fn resolve(
    engine: &OperationEngine,
    scanner: &ProjectScanner,
    target: &Target,
) -> Result<Project> {
    if let Some(name) = &target.project {
        return engine
            .get_project(name)
            .await
            .with_context(|| format!("Failed to find project {name}"));
    }
    scanner
        .project_at(&target.dir)
        .await
        .with_context(|| format!("Failed to read {}", target.dir.display()))?
        .with_context(|| format!("No compose file found in {}", target.dir.display()))
}

async fn dispatch(
    engine: &OperationEngine,
    scanner: &ProjectScanner,
    command: Commands,
) -> Result<()> {
    match command {
        Commands::Scan { .. } => bail!("scan does not use the container runtime"),
        Commands::Projects { json } => {
            let projects = engine.discover_projects().await?;
            if json {
                let list: Vec<&Project> = projects.values().collect();
                println!("{}", serde_json::to_string_pretty(&list)?);
            } else {
                for project in projects.values() {
                    println!(
                        "{:<24} {:<8} {} service(s)  {}",
                        project.name,
                        project.status(),
                        project.services().len(),
                        project.path.display()
                    );
                }
            }
            Ok(())
        }
        Commands::Ps { target, json } => {
            let project = resolve(engine, scanner, &target).await?;
            let services = engine.ps(&project).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&services)?);
            } else {
                print_services(&services);
            }
            Ok(())
        }
        Commands::Up {
            target,
            services,
            detach,
            build,
            force_recreate,
            remove_orphans,
            stream,
        } => {
            let options = OperationOptions {
                detach,
                build,
                force_recreate,
                remove_orphans,
                ..OperationOptions::default()
            };
            let project = resolve(engine, scanner, &target).await?;
            let request = OperationRequest::new(project, OperationKind::Up)
                .with_services(services)
                .with_options(options);
            execute(engine, &request, stream, None).await
        }
        Commands::Down {
            target,
            volumes,
            remove_orphans,
            rmi,
        } => {
            let options = OperationOptions {
                remove_volumes: volumes,
                remove_orphans,
                remove_images: rmi.map(|rmi| match rmi {
                    Rmi::All => RemoveImages::All,
                    Rmi::Local => RemoveImages::Local,
                }),
                ..OperationOptions::default()
            };
            let project = resolve(engine, scanner, &target).await?;
            report(engine.down(&project, options).await?)
        }
        Commands::Start { target, services } => {
            let project = resolve(engine, scanner, &target).await?;
            report(engine.start(&project, &services).await?)
        }
        Commands::Stop {
            target,
            services,
            timeout,
        } => {
            let project = resolve(engine, scanner, &target).await?;
            report(
                engine
                    .stop(&project, &services, timeout.map(Duration::from_secs))
                    .await?,
            )
        }
        Commands::Restart {
            target,
            services,
            timeout,
        } => {
            let project = resolve(engine, scanner, &target).await?;
            report(
                engine
                    .restart(&project, &services, timeout.map(Duration::from_secs))
                    .await?,
            )
        }
        Commands::Pause { target, services } => {
            let project = resolve(engine, scanner, &target).await?;
            report(engine.pause(&project, &services).await?)
        }
        Commands::Unpause { target, services } => {
            let project = resolve(engine, scanner, &target).await?;
            report(engine.unpause(&project, &services).await?)
        }
        Commands::Build {
            target,
            services,
            no_cache,
            pull,
            stream,
        } => {
            let options = OperationOptions {
                no_cache,
                pull,
                ..OperationOptions::default()
            };
            let project = resolve(engine, scanner, &target).await?;
            let request = OperationRequest::new(project, OperationKind::Build)
                .with_services(services)
                .with_options(options);
            execute(engine, &request, stream, None).await
        }
        Commands::Pull {
            target,
            services,
            ignore_pull_failures,
            progress,
        } => {
            let options = OperationOptions {
                ignore_pull_failures,
                ..OperationOptions::default()
            };
            let project = resolve(engine, scanner, &target).await?;
            let request = OperationRequest::new(project, OperationKind::Pull)
                .with_services(services)
                .with_options(options);
            let tracker = progress.then(ProgressTracker::new);
            execute(engine, &request, progress, tracker).await
        }
        Commands::Logs {
            target,
            services,
            follow,
            timestamps,
            tail,
            since,
        } => {
            let options = LogOptions {
                follow,
                timestamps,
                tail,
                since,
                until: None,
            };
            let project = resolve(engine, scanner, &target).await?;
            if follow {
                let stream = engine
                    .project_logs_stream(&project, &services, &options)
                    .await?;
                drain(stream, None).await
            } else {
                print!(
                    "{}",
                    engine.project_logs(&project, &services, &options).await?
                );
                Ok(())
            }
        }
        Commands::Config { target } => {
            let project = resolve(engine, scanner, &target).await?;
            print!("{}", engine.config(&project).await?);
            Ok(())
        }
        Commands::Events { project } => {
            let cancel = CancellationToken::new();
            let mut events = engine.watch_project(&project, cancel.clone());
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Some(event) => println!("{}", serde_json::to_string(&event?)?),
                        None => break,
                    },
                    _ = tokio::signal::ctrl_c() => {
                        cancel.cancel();
                        break;
                    }
                }
            }
            Ok(())
        }
    }
}

async fn execute(
    engine: &OperationEngine,
    request: &OperationRequest,
    stream: bool,
    tracker: Option<ProgressTracker>,
) -> Result<()> {
    if stream {
        drain(engine.execute_stream(request).await?, tracker).await
    } else {
        report(engine.execute(request).await?)
    }
}

/// Prints a stream's lines until it ends. Ctrl-C cancels the operation.
async fn drain(mut stream: OperationStream, mut tracker: Option<ProgressTracker>) -> Result<()> {
    loop {
        tokio::select! {
            line = stream.next_line() => match line {
                Some(line) => match tracker.as_mut() {
                    Some(tracker) => {
                        if tracker.ingest_line(&line) {
                            print_progress(tracker);
                        } else {
                            println!("{line}");
                        }
                    }
                    None => println!("{line}"),
                },
                None => break,
            },
            _ = tokio::signal::ctrl_c(), if !stream.is_cancelled() => stream.cancel(),
        }
    }

    let result = stream
        .result()
        .await
        .context("Operation ended without a result")?;
    report(result)
}

fn print_progress(tracker: &ProgressTracker) {
    let summary = tracker.summary();
    println!(
        "{:>5.1}% {:?} ({}/{} layers)",
        summary.percent, summary.status, summary.completed_layers, summary.layer_count
    );
}

fn report(result: OperationResult) -> Result<()> {
    if !result.stdout.trim().is_empty() {
        print!("{}", result.stdout);
    }
    if result.success {
        println!(
            "{} ({:.1}s)",
            result.message,
            result.duration.as_secs_f64()
        );
        return Ok(());
    }

    match result.error {
        Some(error) => {
            if !error.detail.trim().is_empty() {
                eprintln!("{}", error.detail.trim_end());
            }
            eprintln!("hint: {}", error.suggestion);
            Err(error.into())
        }
        None => bail!(result.message),
    }
}

fn print_services(services: &[Service]) {
    if services.is_empty() {
        println!("No containers.");
        return;
    }
    println!("{:<20} {:<8} {:>8}  PORTS", "SERVICE", "STATE", "RUNNING");
    for service in services {
        let ports: Vec<String> = service.ports.iter().map(ToString::to_string).collect();
        println!(
            "{:<20} {:<8} {:>8}  {}",
            service.name,
            service.state(),
            format!("{}/{}", service.running(), service.replicas()),
            ports.join(", ")
        );
    }
}
