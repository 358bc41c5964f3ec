pub(crate) mod admin;
pub(crate) mod completions;
pub(crate) mod run;
