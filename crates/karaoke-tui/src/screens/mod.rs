pub mod run_details;
