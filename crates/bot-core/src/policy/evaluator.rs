//! Policy Evaluator (C5): turns a policy plus the current
//! blackboard aggregate into a gating decision. Implements, in order,
//! early-exit honoring, first-match transition, immediate block, AI
//! escalation, and early allow.

use crate::blackboard::Blackboard;
use bot_protocol::{DetectionPolicy, PolicyAction, ReputationState, TransitionCondition, TransitionEffect};

/// What the orchestrator should do next after a wave.
#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationOutcome {
    Continue,
    Transition { target_policy: String, description: String },
    Action(PolicyAction),
    InvokeActionPolicy(String),
}

/// Resolve `weight_overrides[detector] ?? global_defaults[detector] ?? 1.0`.
pub fn effective_weight(detector_name: &str, policy: &DetectionPolicy, global_defaults: &std::collections::BTreeMap<String, f64>) -> f64 {
    policy
        .weight_overrides
        .get(detector_name)
        .or_else(|| global_defaults.get(detector_name))
        .copied()
        .unwrap_or(1.0)
}

fn condition_matches(condition: &TransitionCondition, blackboard: &Blackboard, reputation_state: Option<ReputationState>) -> bool {
    if let Some(threshold) = condition.when_risk_exceeds {
        if !(blackboard.current_risk_score > threshold) {
            return false;
        }
    }
    if let Some(threshold) = condition.when_risk_below {
        if !(blackboard.current_risk_score < threshold) {
            return false;
        }
    }
    if let Some(signal) = &condition.when_signal {
        match blackboard.get(signal) {
            None => return false,
            Some(value) => {
                if let Some(expected) = &condition.when_signal_value {
                    if value != expected {
                        return false;
                    }
                }
            }
        }
    }
    if let Some(expected_state) = condition.when_reputation_state {
        match reputation_state {
            Some(state) if state == expected_state => {}
            _ => return false,
        }
    }
    true
}

/// Evaluate `policy` against the aggregate state already accumulated on
/// `blackboard`. `reputation_state` is the primary identity
/// vector's current cache state, if the caller has it handy, for
/// `when_reputation_state` transitions. `ai_already_ran` suppresses a second
/// `EscalateToAi` within the same request.
pub fn evaluate(
    policy: &DetectionPolicy,
    blackboard: &Blackboard,
    reputation_state: Option<ReputationState>,
    ai_already_ran: bool,
) -> EvaluationOutcome {
    if let Some(early) = blackboard.first_early_exit() {
        let verdict = early.early_exit_verdict.expect("first_early_exit guarantees Some");
        return EvaluationOutcome::Action(if verdict.is_allow() { PolicyAction::Allow } else { PolicyAction::Block });
    }

    let mut visited = std::collections::BTreeSet::new();
    visited.insert(policy.name.clone());
    for transition in &policy.transitions {
        if condition_matches(&transition.condition, blackboard, reputation_state) {
            return match &transition.effect {
                TransitionEffect::ActionPolicyName(name) => EvaluationOutcome::InvokeActionPolicy(name.clone()),
                TransitionEffect::GoToPolicy(name) => {
                    // A visited-name set prevents cycles inside a single
                    // request; a self-loop is treated as Continue.
                    if visited.contains(name) {
                        EvaluationOutcome::Continue
                    } else {
                        EvaluationOutcome::Transition {
                            target_policy: name.clone(),
                            description: transition.description.clone(),
                        }
                    }
                }
                TransitionEffect::Action(action) => EvaluationOutcome::Action(*action),
            };
        }
    }

    let risk = blackboard.current_risk_score;
    let confidence = blackboard.confidence;

    if risk >= policy.immediate_block_threshold && confidence >= policy.min_confidence {
        return EvaluationOutcome::Action(PolicyAction::Block);
    }
    if policy.escalate_to_ai && risk >= policy.ai_escalation_threshold && !ai_already_ran {
        return EvaluationOutcome::Action(PolicyAction::EscalateToAi);
    }
    if policy.use_fast_path && risk <= policy.early_exit_threshold {
        return EvaluationOutcome::Action(PolicyAction::Allow);
    }

    EvaluationOutcome::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::builtins::default_policy;
    use bot_protocol::{DetectionContribution, EarlyExitVerdict};

    #[test]
    fn early_exit_short_circuits_transitions_and_thresholds() {
        let mut policy = default_policy();
        policy.transitions.push(bot_protocol::PolicyTransition {
            condition: TransitionCondition::default(),
            effect: TransitionEffect::Action(PolicyAction::Throttle),
            description: "would always fire".to_string(),
        });
        let mut bb = Blackboard::new();
        let mut c = DetectionContribution::neutral("verified_bot");
        c.trigger_early_exit = true;
        c.early_exit_verdict = Some(EarlyExitVerdict::VerifiedGoodBot);
        bb.push_contribution(c);

        let outcome = evaluate(&policy, &bb, None, false);
        assert_eq!(outcome, EvaluationOutcome::Action(PolicyAction::Allow));
    }

    #[test]
    fn immediate_block_requires_both_risk_and_confidence() {
        let policy = default_policy();
        let mut bb = Blackboard::new();
        bb.current_risk_score = 0.95;
        bb.confidence = 0.1;
        assert_eq!(evaluate(&policy, &bb, None, false), EvaluationOutcome::Continue);

        bb.confidence = 0.9;
        assert_eq!(evaluate(&policy, &bb, None, false), EvaluationOutcome::Action(PolicyAction::Block));
    }

    #[test]
    fn ai_escalation_suppressed_once_already_run() {
        let mut policy = default_policy();
        policy.escalate_to_ai = true;
        policy.ai_escalation_threshold = 0.5;
        policy.immediate_block_threshold = 0.99;
        let mut bb = Blackboard::new();
        bb.current_risk_score = 0.6;
        bb.confidence = 0.9;

        assert_eq!(evaluate(&policy, &bb, None, false), EvaluationOutcome::Action(PolicyAction::EscalateToAi));
        assert_eq!(evaluate(&policy, &bb, None, true), EvaluationOutcome::Continue);
    }

    #[test]
    fn early_allow_below_exit_threshold() {
        let policy = default_policy();
        let mut bb = Blackboard::new();
        bb.current_risk_score = 0.02;
        bb.confidence = 0.9;
        assert_eq!(evaluate(&policy, &bb, None, false), EvaluationOutcome::Action(PolicyAction::Allow));
    }

    #[test]
    fn first_match_transition_wins_over_threshold_gates() {
        let mut policy = default_policy();
        policy.transitions.push(bot_protocol::PolicyTransition {
            condition: TransitionCondition {
                when_risk_exceeds: Some(0.5),
                ..Default::default()
            },
            effect: TransitionEffect::GoToPolicy("strict".to_string()),
            description: "escalate to strict".to_string(),
        });
        let mut bb = Blackboard::new();
        bb.current_risk_score = 0.99;
        bb.confidence = 0.99;
        let outcome = evaluate(&policy, &bb, None, false);
        assert_eq!(
            outcome,
            EvaluationOutcome::Transition {
                target_policy: "strict".to_string(),
                description: "escalate to strict".to_string(),
            }
        );
    }

    #[test]
    fn self_transition_is_treated_as_cycle_guard_continue() {
        let mut policy = default_policy();
        policy.transitions.push(bot_protocol::PolicyTransition {
            condition: TransitionCondition::default(),
            effect: TransitionEffect::GoToPolicy("default".to_string()),
            description: "self loop".to_string(),
        });
        let bb = Blackboard::new();
        assert_eq!(evaluate(&policy, &bb, None, false), EvaluationOutcome::Continue);
    }
}
