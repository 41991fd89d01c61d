//! Uploading files to the device
//!
//! The transfer tool keeps a stateful session on a single serial line, so
//! files are always uploaded one after the other.

use log::debug;

use crate::{
    config::DeviceConfig,
    error::Error,
    filesystem::transfer_tool_args,
    progress::ProgressSink,
    space::FileRecord,
    tool::ToolRunner,
};

/// Upload a single file, streaming the tool's output to `progress`
pub fn put(
    config: &DeviceConfig,
    runner: &mut dyn ToolRunner,
    file: &FileRecord,
    progress: &mut dyn ProgressSink,
) -> Result<(), Error> {
    debug!("Uploading {} ({} bytes)", file.path.display(), file.size);
    progress.status(&format!("Uploading {}", file.name));

    let local = file.path.display().to_string();
    runner
        .run(
            &config.tools.transfer,
            &transfer_tool_args(config, "put", &local),
            &mut |line| progress.tool_output(line),
        )
        .map_err(|source| Error::TransferFailed {
            file: file.path.clone(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{chip::Chip, error::ToolError};

    #[derive(Default)]
    struct Collect {
        lines: Vec<String>,
    }

    impl ProgressSink for Collect {
        fn status(&mut self, line: &str) {
            self.lines.push(format!("status: {line}"));
        }

        fn warning(&mut self, line: &str) {
            self.lines.push(format!("warning: {line}"));
        }

        fn tool_output(&mut self, line: &str) {
            self.lines.push(format!("tool: {line}"));
        }

        fn success(&mut self, line: &str) {
            self.lines.push(format!("success: {line}"));
        }
    }

    struct Put {
        exit: Option<i32>,
        args: Vec<String>,
    }

    impl ToolRunner for Put {
        fn run(
            &mut self,
            program: &Path,
            args: &[String],
            sink: &mut dyn FnMut(&str),
        ) -> Result<(), ToolError> {
            self.args = args.to_vec();
            sink("50%");
            sink("100%");
            match self.exit {
                Some(code) => Err(ToolError::Exited {
                    program: program.display().to_string(),
                    code: Some(code),
                    message: None,
                }),
                None => Ok(()),
            }
        }
    }

    fn file() -> FileRecord {
        FileRecord {
            name: String::from("main.py"),
            path: PathBuf::from("/project/main.py"),
            size: 42,
        }
    }

    #[test]
    fn put_streams_progress() {
        let config = DeviceConfig::new(Chip::Esp32, "COM3", "fw.bin", "/project");
        let mut runner = Put {
            exit: None,
            args: Vec::new(),
        };
        let mut progress = Collect::default();

        put(&config, &mut runner, &file(), &mut progress).unwrap();

        assert_eq!(
            runner.args,
            vec!["put", "-pCOM3", "-d1", "-rT", "/project/main.py"]
        );
        assert_eq!(
            progress.lines,
            vec!["status: Uploading main.py", "tool: 50%", "tool: 100%"]
        );
    }

    #[test]
    fn nonzero_exit_is_a_transfer_failure() {
        let config = DeviceConfig::new(Chip::Esp32, "COM3", "fw.bin", "/project");
        let mut runner = Put {
            exit: Some(1),
            args: Vec::new(),
        };

        let err = put(&config, &mut runner, &file(), &mut Collect::default()).unwrap_err();

        match err {
            Error::TransferFailed { file, source } => {
                assert_eq!(file, PathBuf::from("/project/main.py"));
                assert_eq!(source.exit_code(), Some(1));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
