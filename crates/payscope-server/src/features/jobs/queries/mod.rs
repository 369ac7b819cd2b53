pub mod get_job;
