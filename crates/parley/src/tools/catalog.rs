use crate::models::tool::{ParamType, Tool, ToolParameter};

pub const LIST_FILES: &str = "list_files";
pub const READ_FILE: &str = "read_file";
pub const RUN_COMMAND: &str = "run_command";

/// The built-in project tools, in the order they are offered to models
pub fn builtin_tools() -> Vec<Tool> {
    vec![
        Tool::new(
            LIST_FILES,
            "List the readable files of the project, recursively. Secrets, binaries and \
            build or VCS directories are left out. Paths are relative to the project root.",
            vec![ToolParameter::optional(
                "path",
                ParamType::String,
                "Sub-directory to list, relative to the current directory. Defaults to the current directory.",
            )],
        ),
        Tool::new(
            READ_FILE,
            "Read the contents of a text file in the project. Large files are truncated.",
            vec![ToolParameter::required(
                "path",
                ParamType::String,
                "Path of the file, relative to the current directory.",
            )],
        ),
        Tool::new(
            RUN_COMMAND,
            "Run one of the allowed commands inside the project: `pwd`, `ls [dir]` or \
            `cd <dir>`. Any other command is rejected.",
            vec![ToolParameter::required(
                "command",
                ParamType::String,
                "The command line to run, e.g. `ls src`.",
            )],
        ),
    ]
}
