pub mod attendance;
pub mod backup;
pub mod classes;
pub mod core;
pub mod fees;
pub mod payments;
pub mod rankings;
pub mod reports;
pub mod scores;
pub mod setup;
pub mod students;
pub mod subjects;
pub mod years;
