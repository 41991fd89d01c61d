//! Progress reporting
//!
//! A session reports to two places: a [ProgressSink] for human-readable lines
//! and a [HostChannel] for controls of the application driving it.

/// Receives human-readable progress lines from a flash session
pub trait ProgressSink {
    /// A normal status update
    fn status(&mut self, line: &str);
    /// Something unexpected happened, and the session is working around it
    fn warning(&mut self, line: &str);
    /// Raw output of an external tool
    fn tool_output(&mut self, line: &str);
    /// The session completed successfully
    fn success(&mut self, line: &str);
}

/// Requests sent to the host application driving the session
pub trait HostChannel {
    /// Enable or disable the host's "abort upload" control
    fn set_abort_enabled(&mut self, enabled: bool);
}

/// Forwards progress to the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn status(&mut self, line: &str) {
        log::info!("{line}");
    }

    fn warning(&mut self, line: &str) {
        log::warn!("{line}");
    }

    fn tool_output(&mut self, line: &str) {
        log::debug!("{line}");
    }

    fn success(&mut self, line: &str) {
        log::info!("{line}");
    }
}

/// A host without an abort control
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHost;

impl HostChannel for NoHost {
    fn set_abort_enabled(&mut self, enabled: bool) {
        log::debug!("Abort control enabled: {enabled}");
    }
}
