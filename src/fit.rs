//! Placement policy shared by both allocators
//!
//! Each allocator enumerates its free candidates in ascending address order
//! (gaps for the boundary-tag allocator, free blocks for the buddy
//! allocator) and lets [`select`] pick exactly one of them.

/// Placement policy used to choose among several adequate free candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(usize)]
pub enum FitMode {
    /// First adequate candidate in address order.
    #[default]
    FirstFit = 0,
    /// Adequate candidate leaving the smallest remainder.
    BestFit = 1,
    /// Largest adequate candidate.
    WorstFit = 2,
}

impl FitMode {
    /// Decode a mode stored in an arena header.
    pub(crate) const fn from_raw(raw: usize) -> Self {
        match raw {
            1 => FitMode::BestFit,
            2 => FitMode::WorstFit,
            _ => FitMode::FirstFit,
        }
    }

    pub(crate) const fn into_raw(self) -> usize {
        self as usize
    }
}

/// A free region offered to [`select`].
pub trait Candidate {
    /// Size compared against the requirement.
    fn size(&self) -> usize;
}

impl Candidate for usize {
    fn size(&self) -> usize {
        *self
    }
}

/// Pick one candidate of at least `required` bytes according to `mode`.
///
/// Candidates must arrive in ascending address order; ties are broken in
/// favour of the lower address.
pub fn select<C, I>(mode: FitMode, required: usize, candidates: I) -> Option<C>
where
    C: Candidate,
    I: IntoIterator<Item = C>,
{
    let mut adequate = candidates.into_iter().filter(|c| c.size() >= required);

    match mode {
        FitMode::FirstFit => adequate.next(),
        FitMode::BestFit => {
            let mut best: Option<C> = None;
            for candidate in adequate {
                if candidate.size() == required {
                    return Some(candidate);
                }
                if best.as_ref().map_or(true, |b| candidate.size() < b.size()) {
                    best = Some(candidate);
                }
            }
            best
        }
        FitMode::WorstFit => {
            let mut worst: Option<C> = None;
            for candidate in adequate {
                if worst.as_ref().map_or(true, |w| candidate.size() > w.size()) {
                    worst = Some(candidate);
                }
            }
            worst
        }
    }
}
