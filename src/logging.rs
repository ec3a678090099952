use std::path::Path;
use tracing_core::{Level, LevelFilter};
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{registry, Layer};

/// If a global tracing subscriber is not already configured, log to stdout and to a file, and
/// add our custom panic hook.
///
/// Returns `false` when another subscriber was already installed.
pub fn install_logger(file_path: &Path) -> bool {
    let writer = tracing_appender::rolling::never(
        file_path.parent().unwrap_or_else(|| Path::new(".")),
        file_path
            .file_name()
            .unwrap_or_else(|| panic!("The path '{}' to point to a file.", file_path.display())),
    );
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(writer)
        .with_filter(LevelFilter::INFO)
        .with_filter(filter_fn(|m| {
            if let Some(path) = m.module_path() {
                // The wgpu crate is logging too much, so we skip `info` level.
                if path.starts_with("wgpu") && *m.level() >= Level::INFO {
                    return false;
                }
            }
            true
        }));
    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_filter(LevelFilter::INFO)
        .with_filter(filter_fn(|m| {
            m.module_path()
                .map(|path| path.starts_with(env!("CARGO_CRATE_NAME")))
                .unwrap_or(true)
        }));

    let installed = registry()
        .with(file_layer)
        .with(stdout_layer)
        .try_init()
        .is_ok();

    if installed {
        install_panic_hook(file_path);
    }

    installed
}

/// Message printed when a run panics: where its log is and which checkpoints can resume it.
fn panic_banner(log_file: &Path) -> String {
    let run_dir = log_file.parent().unwrap_or_else(|| Path::new("."));

    format!(
        "=== PANIC ===\nThe run stopped on a fatal error, its log is in '{}'.\nResume it from \
         a checkpoint of '{}' with `--checkpoint {}`.\n=============",
        log_file.display(),
        run_dir.join("checkpoints").display(),
        run_dir.display()
    )
}

fn install_panic_hook(log_file: &Path) {
    let hook = std::panic::take_hook();
    let banner = panic_banner(log_file);

    std::panic::set_hook(Box::new(move |info| {
        log::error!("Run panicked: {info}");
        eprintln!("{banner}");
        hook(info);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_banner_points_at_the_run() {
        let banner = panic_banner(Path::new("artifacts/wtvae64/experiment.log"));

        assert!(banner.contains("'artifacts/wtvae64/experiment.log'"));
        assert!(banner.contains("--checkpoint artifacts/wtvae64"));
        let checkpoints = Path::new("artifacts/wtvae64").join("checkpoints");
        assert!(banner.contains(&checkpoints.display().to_string()));
    }
}
