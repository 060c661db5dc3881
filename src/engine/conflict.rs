use crate::model::*;

/// Whether `candidate` may not be booked next to `existing`.
///
/// Equivalent to the three-way test "candidate starts inside existing, ends
/// inside existing, or swallows it", boundary ties included: back-to-back
/// spans never conflict.
pub fn conflicts(candidate: &Span, existing: &Span) -> bool {
    candidate.overlaps(existing)
}

/// First active reservation among `existing` that blocks `candidate`.
/// Callers pass reservations of a single room.
pub fn find_conflict<'a>(
    existing: impl IntoIterator<Item = &'a Reservation>,
    candidate: &Span,
) -> Option<&'a Reservation> {
    existing
        .into_iter()
        .find(|r| r.is_active() && conflicts(candidate, &r.span))
}
