//! Host service supervisor (systemd) control.

use crate::utils::errors::{RecoveryError, Result};
use std::process::Command;
use tracing::info;

/// Start/stop capability of the host init system.
pub trait ServiceSupervisor {
    fn stop(&self, unit: &str) -> Result<()>;
    fn reload(&self) -> Result<()>;
    fn start(&self, unit: &str) -> Result<()>;
}

/// Drives units through `systemctl`.
#[derive(Debug, Clone)]
pub struct Systemctl {
    program: String,
}

impl Systemctl {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run(&self, args: &[&str]) -> Result<()> {
        let command = format!("{} {}", self.program, args.join(" "));
        let status = Command::new(&self.program)
            .args(args)
            .status()
            .map_err(|e| RecoveryError::io(&self.program, e))?;

        if status.success() {
            Ok(())
        } else {
            Err(RecoveryError::process(command, status))
        }
    }
}

impl Default for Systemctl {
    fn default() -> Self {
        Self::new("systemctl")
    }
}

impl ServiceSupervisor for Systemctl {
    fn stop(&self, unit: &str) -> Result<()> {
        self.run(&["stop", unit])
    }

    fn reload(&self) -> Result<()> {
        self.run(&["daemon-reload"])
    }

    fn start(&self, unit: &str) -> Result<()> {
        self.run(&["start", unit])
    }
}

pub fn stop_supervised_service<S: ServiceSupervisor + ?Sized>(supervisor: &S, unit: &str) -> Result<()> {
    info!("Stopping {}", unit);
    supervisor.stop(unit)
}

/// Reload unit definitions, then start `unit`.
pub fn start_supervised_service<S: ServiceSupervisor + ?Sized>(supervisor: &S, unit: &str) -> Result<()> {
    info!("Starting {}", unit);
    supervisor.reload()?;
    supervisor.start(unit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Recorder {
        calls: RefCell<Vec<String>>,
        fail_reload: bool,
    }

    impl ServiceSupervisor for Recorder {
        fn stop(&self, unit: &str) -> Result<()> {
            self.calls.borrow_mut().push(format!("stop {}", unit));
            Ok(())
        }

        fn reload(&self) -> Result<()> {
            self.calls.borrow_mut().push("daemon-reload".to_string());
            if self.fail_reload {
                return Err(RecoveryError::Process {
                    command: "systemctl daemon-reload".to_string(),
                    status: "exit status: 1".to_string(),
                });
            }
            Ok(())
        }

        fn start(&self, unit: &str) -> Result<()> {
            self.calls.borrow_mut().push(format!("start {}", unit));
            Ok(())
        }
    }

    #[test]
    fn test_start_reloads_first() -> Result<()> {
        let recorder = Recorder::default();
        start_supervised_service(&recorder, "kubelet.service")?;
        assert_eq!(
            *recorder.calls.borrow(),
            vec!["daemon-reload".to_string(), "start kubelet.service".to_string()]
        );
        Ok(())
    }

    #[test]
    fn test_failed_reload_does_not_start() {
        let recorder = Recorder {
            fail_reload: true,
            ..Default::default()
        };
        let err = start_supervised_service(&recorder, "kubelet.service").unwrap_err();
        assert_eq!(err.kind(), crate::utils::ErrorKind::Io);
        assert_eq!(recorder.calls.borrow().len(), 1);
    }

    #[test]
    fn test_stop() -> Result<()> {
        let recorder = Recorder::default();
        stop_supervised_service(&recorder, "kubelet.service")?;
        assert_eq!(*recorder.calls.borrow(), vec!["stop kubelet.service".to_string()]);
        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_systemctl_surfaces_exit_status() {
        // `false` exits 1 regardless of arguments
        let err = Systemctl::new("false").stop("kubelet.service").unwrap_err();
        assert!(matches!(err, RecoveryError::Process { .. }));
        assert!(err.to_string().contains("false stop kubelet.service"));
    }

    #[test]
    fn test_systemctl_missing_binary_is_io_error() {
        let err = Systemctl::new("/nonexistent/systemctl").reload().unwrap_err();
        assert!(matches!(err, RecoveryError::Io { .. }));
    }
}
