pub mod client;
pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod guard;
pub mod registry;
pub mod runtime;
pub mod server;
pub mod state;

use crate::config::AppConfig;
use crate::driver::cdp::CdpDriver;
use crate::driver::PageDriver;
use crate::error::{FieldscribeError, Result};
use crate::runtime::descriptor::{self, ConnectionDescriptor, SessionMode};
use crate::state::AppState;
use std::path::PathBuf;
use std::sync::Arc;

/// Options resolved from CLI flags on top of the config file.
pub struct ControllerOptions {
    pub port: Option<u16>,
    /// Remote-debugging address of an existing browser to attach to
    pub attach: Option<String>,
    pub headless: bool,
    pub user_data_dir: Option<PathBuf>,
}

/// Run the controller to completion: start or attach to a browser, install
/// the submit guard, serve the control protocol, and tear down in order.
///
/// Teardown ordering is deliberate. The descriptor is removed *last* and
/// unconditionally, so clients never find a descriptor pointing at a dead
/// port for longer than necessary, even when browser cleanup fails.
pub async fn run_controller(config: AppConfig, opts: ControllerOptions) -> Result<()> {
    let runtime_dir = runtime::default_runtime_dir();
    let port = opts.port.unwrap_or(config.api_port);

    let (mut driver, mode): (Box<dyn PageDriver>, SessionMode) = match &opts.attach {
        Some(addr) => (Box::new(CdpDriver::attach(addr).await?), SessionMode::Attach),
        None => {
            let user_data_dir = opts
                .user_data_dir
                .clone()
                .or_else(|| config.user_data_dir.clone())
                .unwrap_or_else(|| runtime_dir.join("profile"));
            let headless = opts.headless || config.headless;
            let driver =
                CdpDriver::launch(&config.chrome_path, &user_data_dir, headless).await?;
            (Box::new(driver), SessionMode::Managed)
        }
    };

    if let Err(e) = install_guard_for_mode(driver.as_ref(), mode).await {
        let _ = driver.close().await;
        return Err(e);
    }

    let state = Arc::new(AppState::new(config, driver, runtime_dir.clone()));

    // Bind before publishing so the descriptor never points at a dead port
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .map_err(|e| {
            FieldscribeError::Environment(format!("Cannot bind 127.0.0.1:{}: {}", port, e))
        })?;
    let bound_port = listener
        .local_addr()
        .map_err(FieldscribeError::Io)?
        .port();

    descriptor::publish(
        &runtime_dir,
        &ConnectionDescriptor {
            port: bound_port,
            mode,
            started_at: chrono::Utc::now(),
        },
    )
    .await?;

    tracing::info!("Control protocol listening on 127.0.0.1:{}", bound_port);
    let served = server::run_server(state.clone(), listener).await;

    // Teardown: browser first, descriptor removal last, always
    {
        let mut plane = state.control.lock().await;
        if let Err(e) = plane.driver.close().await {
            tracing::warn!("Browser close failed during teardown: {}", e);
        }
    }
    if let Err(e) = descriptor::remove(&runtime_dir).await {
        tracing::warn!("Descriptor removal failed: {}", e);
    }

    served
}

/// A managed session exists only because we started it, and its whole
/// safety story rests on the guard covering the context for the life of
/// the process. No guard, no session. An attached browser is the user's
/// own; there we degrade to a warning rather than tearing it down.
async fn install_guard_for_mode(driver: &dyn PageDriver, mode: SessionMode) -> Result<()> {
    match guard::install(driver).await {
        Ok(()) => Ok(()),
        Err(e) if mode == SessionMode::Attach => {
            tracing::warn!("Submit guard installation failed on attached browser: {}", e);
            Ok(())
        }
        Err(e) => Err(FieldscribeError::Environment(format!(
            "submission guard could not be installed: {}",
            e
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::FakePage;

    #[tokio::test]
    async fn test_guard_failure_is_fatal_in_managed_mode() {
        let page = FakePage::new("about:blank");
        page.set_fail_guard(true);
        let err = install_guard_for_mode(&page, SessionMode::Managed)
            .await
            .unwrap_err();
        assert!(matches!(err, FieldscribeError::Environment(_)));
        assert!(!page.guard_installed());
    }

    #[tokio::test]
    async fn test_guard_failure_is_tolerated_in_attach_mode() {
        let page = FakePage::new("about:blank");
        page.set_fail_guard(true);
        install_guard_for_mode(&page, SessionMode::Attach)
            .await
            .unwrap();
        assert!(!page.guard_installed());
    }

    #[tokio::test]
    async fn test_guard_installs_in_either_mode() {
        let page = FakePage::new("about:blank");
        install_guard_for_mode(&page, SessionMode::Managed)
            .await
            .unwrap();
        assert!(page.guard_installed());
    }
}
