//! One-member-at-a-time scaling.

/// The member count to apply in this pass and whether another pass is needed afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScaleStep {
    pub next: u32,
    pub needs_another_pass: bool,
}

impl ScaleStep {
    pub fn is_scaling_down(&self, last_observed: u32) -> bool {
        self.next < last_observed
    }
}

/// Move `last_observed` one member toward `desired`.
///
/// A `last_observed` of zero means nothing has been deployed yet, in which case the desired count
/// is applied at once.
pub fn next_member_count(desired: u32, last_observed: u32) -> ScaleStep {
    let next = if last_observed == 0 || desired == last_observed {
        desired
    } else if desired > last_observed {
        last_observed + 1
    } else {
        last_observed - 1
    };
    ScaleStep {
        next,
        needs_another_pass: next != desired,
    }
}
