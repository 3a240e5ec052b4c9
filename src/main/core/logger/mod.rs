pub mod harness_logger;
