pub mod plagiarism_report;
pub mod problem;
pub mod submission;
pub mod test_case;
