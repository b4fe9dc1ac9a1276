mod import;

pub use import::{Answer, cmd_import, fix_file_errors};
