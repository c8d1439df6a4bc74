//! Admission filters for reconcilers

use std::sync::Arc;

use crate::kinds::NamespacedName;

/// Decides whether a notification is processed; the string explains a rejection
pub type NamespacedNameFilter = Arc<dyn Fn(&NamespacedName) -> (bool, String) + Send + Sync>;

/// Admit only the object named `nsname`
pub fn single_object_filter(nsname: NamespacedName) -> NamespacedNameFilter {
    Arc::new(move |candidate: &NamespacedName| {
        if *candidate == nsname {
            (true, String::new())
        } else {
            (
                false,
                format!("Resource is ignored because only {nsname} is watched"),
            )
        }
    })
}
