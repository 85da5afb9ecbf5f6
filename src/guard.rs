//! Safety guard: neutralizes the page-level programmatic submit call.
//! Installed once per browser context, before any page loads, so it covers
//! every navigation for the life of the process. The control protocol
//! exposes no navigate/submit operation at all; this blocks the one escape
//! hatch a page script could still reach directly.

use crate::driver::PageDriver;
use crate::error::Result;

/// The replacement must return normally: pages that call submit()
/// defensively would break in confusing ways if it threw.
pub const GUARD_SCRIPT: &str = r#"
(() => {
    if (window.__fieldscribe_guard__) return;
    window.__fieldscribe_guard__ = true;
    HTMLFormElement.prototype.submit = function () {
        console.warn("[fieldscribe] form.submit() intercepted and ignored");
    };
})();
"#;

pub async fn install(driver: &dyn PageDriver) -> Result<()> {
    driver.install_guard(GUARD_SCRIPT).await?;
    tracing::info!("Submission guard installed for the browser context");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::FakePage;

    #[tokio::test]
    async fn test_install_marks_context() {
        let page = FakePage::new("about:blank");
        install(&page).await.unwrap();
        assert!(page.guard_installed());
    }

    #[test]
    fn test_guard_script_never_throws_and_is_idempotent() {
        assert!(GUARD_SCRIPT.contains("__fieldscribe_guard__"));
        assert!(GUARD_SCRIPT.contains("console.warn"));
        assert!(!GUARD_SCRIPT.contains("throw"));
    }
}
