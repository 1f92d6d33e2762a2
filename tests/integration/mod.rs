//! Integration tests for the crash aggregation engine

mod test_utils;

mod dump_scanning;
mod maintenance;
mod manager_submissions;
mod ping_emission;
