//! The operation kinds offered by devices

use super::OperationKind;
use crate::data::{Progress, Reason, TemplateId, User, Void};

/// Number of templates enrolled for (application, user)
pub enum SizeQuery {}

impl OperationKind for SizeQuery {
    const NAME: &'static str = "size";
    type Progress = Void;
    type Reason = Reason;
    type Error = String;
    type Result = u32;
}

/// Templates enrolled for (application, user)
pub enum List {}

impl OperationKind for List {
    const NAME: &'static str = "list";
    type Progress = Void;
    type Reason = Reason;
    type Error = String;
    type Result = Vec<TemplateId>;
}

/// Capture and store a new template
pub enum Enrollment {}

impl OperationKind for Enrollment {
    const NAME: &'static str = "enroll";
    type Progress = Progress;
    type Reason = Reason;
    type Error = String;
    type Result = TemplateId;
}

/// Remove one template
pub enum Removal {}

impl OperationKind for Removal {
    const NAME: &'static str = "remove";
    type Progress = Void;
    type Reason = Reason;
    type Error = String;
    type Result = TemplateId;
}

/// Remove every template of (application, user)
pub enum Clearance {}

impl OperationKind for Clearance {
    const NAME: &'static str = "clear";
    type Progress = Void;
    type Reason = Reason;
    type Error = String;
    type Result = Void;
}

/// Find which user a capture belongs to
pub enum Identification {}

impl OperationKind for Identification {
    const NAME: &'static str = "identify";
    type Progress = Progress;
    type Reason = Reason;
    type Error = String;
    type Result = User;
}

/// Check whether a capture belongs to a given user
pub enum Verification {}

impl OperationKind for Verification {
    const NAME: &'static str = "verify";
    type Progress = Progress;
    type Reason = Reason;
    type Error = String;
    type Result = bool;
}
