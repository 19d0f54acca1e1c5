pub mod paths;
pub mod shell;
pub mod split;
