//! Verb and flag construction for compose CLI operations.

use dockhand_core::{LogOptions, OperationKind, OperationOptions};

/// Arguments following the global flags: verb, verb flags, then services.
#[must_use]
pub fn operation_args(
    kind: OperationKind,
    options: &OperationOptions,
    services: &[String],
) -> Vec<String> {
    let mut args = vec![kind.verb().to_string()];

    match kind {
        OperationKind::Up => {
            push_flag(&mut args, options.detach, "--detach");
            push_flag(&mut args, options.force_recreate, "--force-recreate");
            push_flag(&mut args, options.no_recreate, "--no-recreate");
            push_flag(&mut args, options.remove_orphans, "--remove-orphans");
            push_flag(&mut args, options.build, "--build");
            if let Some(policy) = options.pull_policy {
                args.extend(["--pull".to_string(), policy.as_str().to_string()]);
            }
            push_timeout(&mut args, options);
        }
        OperationKind::Down => {
            push_flag(&mut args, options.remove_volumes, "--volumes");
            push_flag(&mut args, options.remove_orphans, "--remove-orphans");
            if let Some(images) = options.remove_images {
                args.extend(["--rmi".to_string(), images.as_str().to_string()]);
            }
            push_timeout(&mut args, options);
        }
        OperationKind::Stop | OperationKind::Restart => push_timeout(&mut args, options),
        OperationKind::Build => {
            push_flag(&mut args, options.no_cache, "--no-cache");
            push_flag(&mut args, options.pull, "--pull");
            push_flag(&mut args, options.quiet, "--quiet");
        }
        OperationKind::Pull => {
            push_flag(&mut args, options.ignore_pull_failures, "--ignore-pull-failures");
            push_flag(&mut args, options.quiet, "--quiet");
            if let Some(policy) = options.pull_policy {
                args.extend(["--policy".to_string(), policy.as_str().to_string()]);
            }
        }
        OperationKind::Start
        | OperationKind::Pause
        | OperationKind::Unpause
        | OperationKind::Ps
        | OperationKind::Config
        | OperationKind::Logs => {}
    }

    args.extend(services.iter().cloned());
    args
}

fn push_flag(args: &mut Vec<String>, on: bool, name: &str) {
    if on {
        args.push(name.to_string());
    }
}

fn push_timeout(args: &mut Vec<String>, options: &OperationOptions) {
    if let Some(timeout) = options.timeout {
        args.extend(["--timeout".to_string(), timeout.as_secs().to_string()]);
    }
}

/// Arguments for `logs`.
#[must_use]
pub fn logs_args(options: &LogOptions, services: &[String]) -> Vec<String> {
    let mut args = vec!["logs".to_string(), "--no-color".to_string()];
    if options.follow {
        args.push("--follow".to_string());
    }
    if options.timestamps {
        args.push("--timestamps".to_string());
    }
    for (flag, value) in [
        ("--tail", &options.tail),
        ("--since", &options.since),
        ("--until", &options.until),
    ] {
        if let Some(value) = value {
            args.extend([flag.to_string(), value.clone()]);
        }
    }
    args.extend(services.iter().cloned());
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockhand_core::operation::{PullPolicy, RemoveImages};
    use std::time::Duration;

    #[test]
    fn up_flags_precede_services() {
        let options = OperationOptions {
            detach: true,
            force_recreate: true,
            pull_policy: Some(PullPolicy::Always),
            timeout: Some(Duration::from_secs(10)),
            ..OperationOptions::default()
        };
        let args = operation_args(OperationKind::Up, &options, &["web".to_string()]);
        assert_eq!(
            args,
            [
                "up",
                "--detach",
                "--force-recreate",
                "--pull",
                "always",
                "--timeout",
                "10",
                "web"
            ]
        );
    }

    #[test]
    fn down_removal_flags() {
        let options = OperationOptions {
            remove_volumes: true,
            remove_images: Some(RemoveImages::Local),
            ..OperationOptions::default()
        };
        let args = operation_args(OperationKind::Down, &options, &[]);
        assert_eq!(args, ["down", "--volumes", "--rmi", "local"]);
    }

    #[test]
    fn options_for_other_kinds_are_ignored() {
        let options = OperationOptions {
            detach: true,
            no_cache: true,
            ..OperationOptions::default()
        };
        assert_eq!(operation_args(OperationKind::Start, &options, &[]), ["start"]);
        assert_eq!(
            operation_args(OperationKind::Build, &options, &[]),
            ["build", "--no-cache"]
        );
    }

    #[test]
    fn logs_flags() {
        let options = LogOptions {
            follow: true,
            tail: Some("50".to_string()),
            ..LogOptions::default()
        };
        assert_eq!(
            logs_args(&options, &["db".to_string()]),
            ["logs", "--no-color", "--follow", "--tail", "50", "db"]
        );
    }
}
