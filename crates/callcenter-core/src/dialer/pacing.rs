//! Pacing: how many dials a campaign places on one tick
//!
//! Every strategy is clamped by the same two bounds: the number of dial candidates the
//! contact store yielded this tick, and the concurrency ceiling
//! `available_agents × max_calls_per_agent` minus the campaign's entries already dialing.
//! Progressive and Predictive pace against idle agents only: an available agent already
//! talking on a call of any campaign or on an inbound line is not idle.
//!
//! [`PacingStrategy`] implements [`PacingPolicy`] with a static dial ratio. A campaign
//! that wants the ratio to follow observed connect and abandon rates supplies its own
//! `PacingPolicy` when it is started.

use super::campaign::PacingStrategy;

/// Inputs to one pacing decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacingInput {
    pub available_agents: usize,
    /// Available agents not currently on a call
    pub idle_agents: usize,
    /// Queued entries whose contact is unlocked and retry-eligible right now
    pub candidates: usize,
    /// Dials placed but not yet connected or released
    pub in_flight: usize,
    /// All dialing entries, connected ones included
    pub dialing: usize,
    pub max_calls_per_agent: u32,
    pub power_ceiling: u32,
}

impl PacingInput {
    /// Remaining room under `available_agents × max_calls_per_agent`
    pub fn headroom(&self) -> usize {
        (self.available_agents * self.max_calls_per_agent as usize).saturating_sub(self.dialing)
    }
}

/// Decides the number of dials per tick
pub trait PacingPolicy: Send + Sync {
    fn name(&self) -> String;

    /// Dials the strategy wants before the common bounds are applied
    fn desired_dials(&self, input: &PacingInput) -> usize;

    /// Dials to place this tick
    fn dials_for_tick(&self, input: &PacingInput) -> usize {
        if input.available_agents == 0 {
            return 0;
        }
        self.desired_dials(input)
            .min(input.candidates)
            .min(input.headroom())
    }
}

impl PacingPolicy for PacingStrategy {
    fn name(&self) -> String {
        self.to_string()
    }

    fn desired_dials(&self, input: &PacingInput) -> usize {
        match self {
            PacingStrategy::Progressive => input.idle_agents.saturating_sub(input.in_flight),
            PacingStrategy::Predictive { dial_ratio } => {
                let target = (input.idle_agents as f64 * dial_ratio.max(0.0)).floor() as usize;
                target.saturating_sub(input.in_flight)
            }
            PacingStrategy::Power => input.power_ceiling as usize,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(available: usize, candidates: usize) -> PacingInput {
        PacingInput {
            available_agents: available,
            idle_agents: available,
            candidates,
            in_flight: 0,
            dialing: 0,
            max_calls_per_agent: 3,
            power_ceiling: 20,
        }
    }

    #[test]
    fn test_progressive_one_per_idle_agent() {
        assert_eq!(PacingStrategy::Progressive.dials_for_tick(&input(3, 10)), 3);
        assert_eq!(PacingStrategy::Progressive.dials_for_tick(&input(3, 2)), 2);

        let mut busy = input(3, 10);
        busy.in_flight = 2;
        busy.dialing = 2;
        assert_eq!(PacingStrategy::Progressive.dials_for_tick(&busy), 1);
    }

    #[test]
    fn test_predictive_floors_ratio() {
        let predictive = PacingStrategy::Predictive { dial_ratio: 1.5 };
        assert_eq!(predictive.dials_for_tick(&input(4, 10)), 6);
        assert_eq!(predictive.dials_for_tick(&input(4, 4)), 4);
        assert_eq!(predictive.dials_for_tick(&input(3, 10)), 4);
    }

    #[test]
    fn test_power_respects_ceiling_and_headroom() {
        let mut i = input(10, 100);
        assert_eq!(PacingStrategy::Power.dials_for_tick(&i), 20);

        i.available_agents = 2;
        i.idle_agents = 2;
        assert_eq!(PacingStrategy::Power.dials_for_tick(&i), 6);

        i.dialing = 5;
        assert_eq!(PacingStrategy::Power.dials_for_tick(&i), 1);
    }

    #[test]
    fn test_agents_on_calls_are_not_idle() {
        // three agents available, two already talking on connected dials
        let i = PacingInput {
            available_agents: 3,
            idle_agents: 1,
            candidates: 10,
            in_flight: 0,
            dialing: 2,
            max_calls_per_agent: 3,
            power_ceiling: 20,
        };
        assert_eq!(PacingStrategy::Progressive.dials_for_tick(&i), 1);
        assert_eq!(PacingStrategy::Predictive { dial_ratio: 2.0 }.dials_for_tick(&i), 2);
        assert_eq!(PacingStrategy::Power.dials_for_tick(&i), 7);

        let all_talking = PacingInput { idle_agents: 0, dialing: 3, ..i };
        assert_eq!(PacingStrategy::Progressive.dials_for_tick(&all_talking), 0);
        assert_eq!(PacingStrategy::Predictive { dial_ratio: 1.5 }.dials_for_tick(&all_talking), 0);
    }

    #[test]
    fn test_no_agents_no_dials() {
        for strategy in [
            PacingStrategy::Progressive,
            PacingStrategy::Predictive { dial_ratio: 2.0 },
            PacingStrategy::Power,
        ] {
            assert_eq!(strategy.dials_for_tick(&input(0, 50)), 0);
        }
    }

    #[test]
    fn test_never_exceeds_concurrency_ceiling() {
        let strategy = PacingStrategy::Predictive { dial_ratio: 10.0 };
        for available in 1..6 {
            for in_flight in 0..20 {
                let i = PacingInput {
                    available_agents: available,
                    idle_agents: available,
                    candidates: 100,
                    in_flight,
                    dialing: in_flight,
                    max_calls_per_agent: 2,
                    power_ceiling: 20,
                };
                let dials = strategy.dials_for_tick(&i);
                assert!(dials + in_flight <= (available * 2).max(in_flight));
            }
        }
    }
}
