//! Peg supply state transitions
//!
//! Every connected block stores the full [`PegState`] as of that block. The
//! state of a child is a pure function of its parent's state, its height and
//! its vote, so rolling back to an ancestor is just reading the ancestor's
//! stored state.

use serde::{Deserialize, Serialize};

use super::{PegVote, PegVotes};
use crate::config::PegParams;

/// Supply index expected for the following interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PegProjection {
    /// The interval is still collecting votes; `provisional` is what the
    /// tally would decide if the interval ended now.
    Pending { provisional: u32 },
    /// The interval's last block is connected and the value is final.
    Committed(u32),
}

impl PegProjection {
    pub fn value(&self) -> u32 {
        match self {
            PegProjection::Pending { provisional } => *provisional,
            PegProjection::Committed(value) => *value,
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, PegProjection::Committed(_))
    }
}

/// Peg fields stored on every connected block-index entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PegState {
    /// Supply index in effect for this block
    pub supply_index: u32,
    /// Tally of the interval this block belongs to, including its own vote
    pub votes: PegVotes,
    /// Supply index for the interval after this one
    pub next: PegProjection,
}

/// Interval view derived from a stored state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PegInterval {
    pub start_height: u64,
    pub supply_index: u32,
    pub next: PegProjection,
    pub next_next: PegProjection,
}

impl PegState {
    pub fn genesis(params: &PegParams) -> Self {
        Self {
            supply_index: params.initial_supply_index,
            votes: PegVotes::default(),
            next: PegProjection::Pending {
                provisional: params.initial_supply_index,
            },
        }
    }

    /// State of the block at `height` whose parent ended in `self`.
    pub fn advance(&self, height: u64, vote: PegVote, params: &PegParams) -> PegState {
        if height < params.start_height {
            return PegState {
                supply_index: self.supply_index,
                votes: PegVotes::default(),
                next: PegProjection::Pending {
                    provisional: self.supply_index,
                },
            };
        }

        let opens_interval = params.is_interval_start(height);
        let supply_index = if opens_interval {
            self.next.value()
        } else {
            self.supply_index
        };
        let tally = if opens_interval {
            PegVotes::default()
        } else {
            self.votes
        };
        let votes = tally.with(vote);
        let decided = decide(supply_index, &votes, params);

        let next = if params.is_interval_end(height) {
            PegProjection::Committed(decided)
        } else {
            PegProjection::Pending {
                provisional: decided,
            }
        };

        PegState {
            supply_index,
            votes,
            next,
        }
    }

    /// The interval after next has not started voting yet, so it can only
    /// carry the next interval's value forward.
    pub fn next_next(&self) -> PegProjection {
        PegProjection::Pending {
            provisional: self.next.value(),
        }
    }

    pub fn interval(&self, height: u64, params: &PegParams) -> Option<PegInterval> {
        let start_height = params.interval_start(height)?;
        Some(PegInterval {
            start_height,
            supply_index: self.supply_index,
            next: self.next,
            next_next: self.next_next(),
        })
    }
}

/// Outcome of a tally under the configured vote rule.
pub fn outcome(votes: &PegVotes, params: &PegParams) -> PegVote {
    let leader = votes.plurality();
    match params.quorum_percent {
        Some(quorum) if leader != PegVote::NoChange => {
            let needed = u64::from(quorum) * params.interval_length;
            if u64::from(votes.count(leader)) * 100 >= needed {
                leader
            } else {
                PegVote::NoChange
            }
        }
        _ => leader,
    }
}

/// Supply index following `current` under the tally's outcome, clamped to `[0, max]`.
pub fn decide(current: u32, votes: &PegVotes, params: &PegParams) -> u32 {
    match outcome(votes, params) {
        PegVote::Inflate => current.saturating_add(params.step).min(params.max_supply_index),
        PegVote::Deflate => current.saturating_sub(params.step),
        PegVote::NoChange => current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> PegParams {
        PegParams {
            start_height: 1,
            interval_length: 10,
            initial_supply_index: 5,
            max_supply_index: 7,
            step: 1,
            quorum_percent: None,
        }
    }

    fn run(votes: &[PegVote], params: &PegParams) -> Vec<PegState> {
        let mut states = vec![PegState::genesis(params)];
        for (i, vote) in votes.iter().enumerate() {
            let next = states[i].advance(i as u64 + 1, *vote, params);
            states.push(next);
        }
        states
    }

    #[test]
    fn test_interval_commits_on_last_block() {
        let p = params();
        let mut votes = vec![PegVote::Inflate; 6];
        votes.extend(vec![PegVote::NoChange; 4]);
        let states = run(&votes, &p);

        let last = states[10];
        assert_eq!(last.votes.as_tuple(), (6, 0, 4));
        assert_eq!(last.next, PegProjection::Committed(6));
        assert_eq!(last.supply_index, 5);

        let before_last = states[9];
        assert_eq!(before_last.next, PegProjection::Pending { provisional: 6 });
    }

    #[test]
    fn test_committed_value_takes_effect_next_interval() {
        let p = params();
        let states = run(&vec![PegVote::Inflate; 11], &p);
        let first_of_second = states[11];
        assert_eq!(first_of_second.supply_index, 6);
        assert_eq!(first_of_second.votes.as_tuple(), (1, 0, 0));
    }

    #[test]
    fn test_supply_index_is_clamped() {
        let p = params();
        let states = run(&vec![PegVote::Inflate; 40], &p);
        assert_eq!(states[40].supply_index, 7);
        assert_eq!(states[40].next.value(), 7);

        let states = run(&vec![PegVote::Deflate; 80], &p);
        assert_eq!(states[80].supply_index, 0);
    }

    #[test]
    fn test_votes_before_start_are_ignored() {
        let mut p = params();
        p.start_height = 5;
        let states = run(&vec![PegVote::Deflate; 4], &p);
        assert_eq!(states[4].votes, PegVotes::default());
        assert_eq!(states[4].supply_index, 5);
        assert_eq!(states[4].next, PegProjection::Pending { provisional: 5 });
    }

    #[test]
    fn test_quorum_gates_outcome() {
        let mut p = params();
        p.quorum_percent = Some(70);
        let votes = PegVotes { inflate: 6, deflate: 0, nochange: 4 };
        assert_eq!(outcome(&votes, &p), PegVote::NoChange);
        let votes = PegVotes { inflate: 7, deflate: 0, nochange: 3 };
        assert_eq!(outcome(&votes, &p), PegVote::Inflate);
    }

    #[test]
    fn test_next_next_follows_next() {
        let p = params();
        let states = run(&vec![PegVote::Inflate; 10], &p);
        assert_eq!(states[10].next_next(), PegProjection::Pending { provisional: 6 });
        let interval = states[10].interval(10, &p).unwrap();
        assert_eq!(interval.start_height, 1);
        assert!(interval.next.is_committed());
    }
}
