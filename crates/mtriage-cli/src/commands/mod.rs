pub mod modules;
pub mod registry_helper;
pub mod run;
pub mod validate;
