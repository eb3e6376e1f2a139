pub mod compress;
pub mod coordinator;
pub mod executor;
pub mod finish;
pub mod interval;
pub mod job_config;
pub mod lock;
pub mod naming;
pub mod report;
pub mod result_error;
pub mod retention;
pub mod snapshot;
pub mod sqlite;
pub mod validate;

macro_rules! function_path {
    () => {
        concat!(module_path!(), "::", function_name!(), " ", file!(), ":", line!())
    };
}

pub(crate) use function_path;
