//! Named events pushed by the attendance backend.
//!
//! Payloads are defined by the backend and passed through untouched, so only
//! the names live here. The list covers what the admin views listen for and
//! is not exhaustive.

/// An employee checked in.
pub const ATTENDANCE_CHECK_IN: &str = "attendance:check_in";
/// An employee checked out.
pub const ATTENDANCE_CHECK_OUT: &str = "attendance:check_out";
/// A new employee registered and awaits approval.
pub const EMPLOYEE_REGISTERED: &str = "employee:registered";
/// An administrator approved a pending employee.
pub const EMPLOYEE_APPROVED: &str = "employee:approved";
/// A leave request was filed.
pub const LEAVE_CREATED: &str = "leave:created";
/// A leave request was approved or rejected.
pub const LEAVE_REVIEWED: &str = "leave:reviewed";

/// Every catalogued event name.
pub const ALL: &[&str] = &[
    ATTENDANCE_CHECK_IN,
    ATTENDANCE_CHECK_OUT,
    EMPLOYEE_REGISTERED,
    EMPLOYEE_APPROVED,
    LEAVE_CREATED,
    LEAVE_REVIEWED,
];

/// Whether `name` is one of the catalogued events.
pub fn is_known(name: &str) -> bool {
    ALL.contains(&name)
}
