pub mod announcements;
pub mod assignments;
pub mod attendance;
pub mod auth;
pub mod catalog;
pub mod certificates;
pub mod core;
pub mod insights;
pub mod projects;
pub mod results;
pub mod resumes;
pub mod users;
