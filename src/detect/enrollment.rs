//! Enrollment policy evaluation.

use crate::config::{EnrollmentMode, ENABLED_LABEL};
use crate::runtime::ContainerRef;

/// Whether a container takes part in update detection.
///
/// A missing label means "not enrolled" under OptIn and "enrolled" under
/// OptOut; an unrecognized value is logged and treated like a missing label.
pub fn is_participating(mode: EnrollmentMode, container: &ContainerRef) -> bool {
    match container.label(ENABLED_LABEL) {
        Some(value) if value.eq_ignore_ascii_case("true") => true,
        Some(value) if value.eq_ignore_ascii_case("false") => false,
        Some(value) => {
            tracing::warn!(
                container = ?container.display_names(),
                value = %value,
                "Container has an invalid value for the enrollment label"
            );
            mode == EnrollmentMode::OptOut
        }
        None => mode == EnrollmentMode::OptOut,
    }
}
