//! Thin solver-agnostic wrapper around `good_lp` (§9 "Linear program assembly").
//!
//! Every scenario in the two-phase solve (§4.6) builds its own
//! [`good_lp::ProblemVariables`] and constraint list through this module so
//! the rest of the crate never imports `good_lp` directly. The only backend
//! wired up is `coin_cbc`, matching the original's `pulp` + CBC pairing
//! (§10.7).

use good_lp::{Constraint, Expression, ProblemVariables, Solution, SolverModel, Variable};
use std::collections::HashMap;

/// Outcome of handing a scenario to the solver. Mirrors the status codes
/// surfaced in the trade summary (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SolveStatus {
    Optimal,
    Infeasible,
    Unbounded,
    Undefined,
}

/// A solved scenario: status plus the value of every decision/auxiliary
/// variable the caller asked to track.
pub struct SolvedScenario {
    pub status: SolveStatus,
    values: HashMap<Variable, f64>,
}

impl SolvedScenario {
    pub fn value(&self, variable: Variable) -> f64 {
        self.values.get(&variable).copied().unwrap_or(0.0)
    }

    pub fn is_optimal(&self) -> bool {
        self.status == SolveStatus::Optimal
    }
}

/// Minimize `objective` subject to `constraints`, reporting the value of
/// every variable in `track` (the decision/auxiliary variables the caller
/// needs for trade extraction or reporting).
pub fn minimize(
    vars: ProblemVariables,
    objective: Expression,
    constraints: Vec<Constraint>,
    track: &[Variable],
) -> SolvedScenario {
    let mut problem = vars.minimise(objective).using(good_lp::solvers::coin_cbc::coin_cbc);
    for c in constraints {
        problem = problem.with(c);
    }

    match problem.solve() {
        Ok(solution) => {
            let values = track.iter().map(|v| (*v, solution.value(*v))).collect();
            SolvedScenario {
                status: SolveStatus::Optimal,
                values,
            }
        }
        Err(good_lp::ResolutionError::Infeasible) => SolvedScenario {
            status: SolveStatus::Infeasible,
            values: HashMap::new(),
        },
        Err(good_lp::ResolutionError::Unbounded) => SolvedScenario {
            status: SolveStatus::Unbounded,
            values: HashMap::new(),
        },
        Err(_) => SolvedScenario {
            status: SolveStatus::Undefined,
            values: HashMap::new(),
        },
    }
}

/// Maximize `objective` subject to `constraints` (used by the max-withdrawal
/// estimator, §4.9, which maximizes sale proceeds rather than minimizing cost).
pub fn maximize(
    vars: ProblemVariables,
    objective: Expression,
    constraints: Vec<Constraint>,
    track: &[Variable],
) -> SolvedScenario {
    let mut problem = vars.maximise(objective).using(good_lp::solvers::coin_cbc::coin_cbc);
    for c in constraints {
        problem = problem.with(c);
    }

    match problem.solve() {
        Ok(solution) => {
            let values = track.iter().map(|v| (*v, solution.value(*v))).collect();
            SolvedScenario {
                status: SolveStatus::Optimal,
                values,
            }
        }
        Err(good_lp::ResolutionError::Infeasible) => SolvedScenario {
            status: SolveStatus::Infeasible,
            values: HashMap::new(),
        },
        Err(good_lp::ResolutionError::Unbounded) => SolvedScenario {
            status: SolveStatus::Unbounded,
            values: HashMap::new(),
        },
        Err(_) => SolvedScenario {
            status: SolveStatus::Undefined,
            values: HashMap::new(),
        },
    }
}
