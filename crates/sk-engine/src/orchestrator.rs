//! Scenario orchestrator — the deterministic loop that interleaves mission
//! events, hazard routines, scripted commands, and the enemy policy.
//!
//! Per-iteration priorities, highest first: at most one eligible mission
//! event, then every eligible hazard routine for the active unit in
//! (priority, id) order, then the next scripted command or an enemy-policy
//! decision. Objectives are evaluated after every executed command; any
//! reducer error becomes a `command_error` event and stops the run.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{json, Map, Value};

use sk_data::effect_model::EffectModelCatalog;
use sk_data::pack::{ContentContext, ContentPack};
use sk_types::command::Command;
use sk_types::event::Event;
use sk_types::ids::{EntryId, PackId, UnitId};
use sk_types::rng::RngState;
use sk_types::state::BattleState;

use crate::enemy_policy;
use crate::objectives::{self, ObjectiveStatus};
use crate::reducer;
use crate::replay;
use crate::result::{ContentPackContext, FinalState, ScenarioResult, StopReason};
use crate::scenario::{
    HazardRoutineDoc, MissionEventDoc, ObjectiveDoc, ScenarioDoc, ScenarioError, TriggerKind,
};
use crate::setup;
use crate::DEFAULT_ENGINE_PHASE;

/// Command types a content entry can materialize into.
const TEMPLATED_COMMANDS: [&str; 4] = ["cast_spell", "use_feat", "use_item", "interact"];

/// Run a validated scenario to completion.
///
/// `packs` are the already-fetched content packs named by the scenario;
/// selection and gating happen here. The effect-model catalog is read-only
/// for the whole run.
pub fn run_scenario(
    doc: &ScenarioDoc,
    packs: &[ContentPack],
    catalog: &EffectModelCatalog,
) -> Result<ScenarioResult, ScenarioError> {
    let engine_phase = doc.engine_phase.unwrap_or(DEFAULT_ENGINE_PHASE);

    let content = if packs.is_empty() {
        None
    } else {
        let selected = doc.content_pack_id.as_ref().map(|id| PackId::from(id.as_str()));
        Some(
            ContentContext::resolve(
                packs,
                selected.as_ref(),
                engine_phase,
                &doc.required_content_features,
            )
            .map_err(|e| ScenarioError::Content(e.to_string()))?,
        )
    };

    let mut mission_events = doc.mission_events.clone();
    mission_events.extend(setup::compile_reinforcements(doc));

    let mut run = Run {
        doc,
        catalog,
        content,
        mission_events,
        objective_docs: setup::expand_objectives(doc),
        state: setup::battle_state_from_scenario(doc),
        rng: RngState::new(doc.seed),
        events: Vec::new(),
        step: 0,
        executed: 0,
        auto_executed: 0,
        script_index: 0,
        mission_fired: BTreeSet::new(),
        mission_once_done: BTreeSet::new(),
        hazard_counts: BTreeMap::new(),
        hazard_fired_turn: BTreeSet::new(),
        last_statuses: Vec::new(),
        stop_reason: None,
    };
    run.execute(engine_phase)
}

struct Run<'a> {
    doc: &'a ScenarioDoc,
    catalog: &'a EffectModelCatalog,
    content: Option<ContentContext>,
    mission_events: Vec<MissionEventDoc>,
    objective_docs: Vec<ObjectiveDoc>,
    state: BattleState,
    rng: RngState,
    events: Vec<Event>,
    step: u32,
    executed: u32,
    auto_executed: u32,
    script_index: usize,
    mission_fired: BTreeSet<String>,
    mission_once_done: BTreeSet<String>,
    hazard_counts: BTreeMap<String, u32>,
    hazard_fired_turn: BTreeSet<String>,
    last_statuses: Vec<ObjectiveStatus>,
    stop_reason: Option<StopReason>,
}

impl<'a> Run<'a> {
    fn execute(mut self, engine_phase: u32) -> Result<ScenarioResult, ScenarioError> {
        if let Some(content) = &self.content {
            let payload = json!({
                "pack_id": content.pack_id.as_str(),
                "version": content.version,
                "feature_tags": content.feature_tags,
                "entry_count": content.entry_count() as u32,
            });
            self.emit("ev_pack_", "content_pack_context", payload);
        }

        // Objectives may already be decided at round 1 turn 0.
        self.evaluate_objectives();

        let max_steps = self
            .doc
            .max_steps
            .unwrap_or(self.doc.commands.len() as u32 + 1000);
        let mut steps = 0u32;

        while self.stop_reason.is_none() {
            if steps >= max_steps {
                self.stop_reason = Some(StopReason::MaxSteps);
                break;
            }
            steps += 1;

            if self.run_one_mission_event() {
                continue;
            }
            if self.stop_reason.is_some() {
                break;
            }

            if self.run_hazard_routines() {
                continue;
            }
            if self.stop_reason.is_some() {
                break;
            }

            if self.script_index < self.doc.commands.len() {
                let raw = self.doc.commands[self.script_index].clone();
                self.script_index += 1;
                if self.dispatch_raw(&raw, false) {
                    self.executed += 1;
                }
                continue;
            }

            match &self.doc.enemy_policy {
                Some(policy) if policy.enabled => self.run_policy_turn(policy.clone()),
                _ => self.stop_reason = Some(StopReason::ScriptExhausted),
            }
        }

        let stop_reason = self.stop_reason.unwrap_or(StopReason::ScriptExhausted);
        let replay_hash = replay::replay_hash(&self.events);
        Ok(ScenarioResult {
            battle_id: self.state.battle_id.clone(),
            seed: self.doc.seed,
            engine_phase,
            executed_commands: self.executed,
            auto_executed_commands: self.auto_executed,
            stop_reason,
            event_count: self.events.len() as u32,
            replay_hash,
            final_state: FinalState::from_state(&self.state),
            content_pack_context: self.content.as_ref().map(|c| ContentPackContext {
                pack_id: c.pack_id.clone(),
                version: c.version.clone(),
                feature_tags: c.feature_tags.clone(),
                entry_count: c.entry_count() as u32,
            }),
            events: self.events,
        })
    }

    // =========================================================================
    // Orchestrator events
    // =========================================================================

    fn emit(&mut self, prefix: &str, event_type: &str, payload: Value) {
        self.step += 1;
        let payload = match payload {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        self.events.push(Event {
            event_id: Event::step_id(prefix, self.step),
            round: self.state.round_number,
            active_unit: self.state.active_unit_id().clone(),
            event_type: event_type.to_string(),
            payload,
        });
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Materialize and dispatch a raw command. Returns true on success; on
    /// failure a command_error event is emitted and the run stops.
    fn dispatch_raw(&mut self, raw: &Value, auto: bool) -> bool {
        match self.materialize(raw) {
            Ok(command) => self.dispatch(&command, auto),
            Err(message) => {
                self.command_error(raw.clone(), &message);
                false
            }
        }
    }

    /// Dispatch a typed command through the reducer without surfacing a
    /// terminal event on failure.
    fn try_apply(&mut self, command: &Command, auto: bool) -> Result<(), String> {
        match reducer::apply(&self.state, command, &mut self.rng, self.catalog) {
            Ok((next, events)) => {
                self.state = next;
                self.events.extend(events);
                if auto {
                    self.auto_executed += 1;
                }
                self.evaluate_objectives();
                Ok(())
            }
            Err(err) => Err(err.to_string()),
        }
    }

    /// Dispatch a typed command; failure is terminal.
    fn dispatch(&mut self, command: &Command, auto: bool) -> bool {
        match self.try_apply(command, auto) {
            Ok(()) => true,
            Err(message) => {
                let raw = serde_json::to_value(command).unwrap_or(Value::Null);
                self.command_error(raw, &message);
                false
            }
        }
    }

    fn command_error(&mut self, command: Value, message: &str) {
        self.emit(
            "ev_error_",
            "command_error",
            json!({ "command": command, "error": message }),
        );
        self.stop_reason = Some(StopReason::CommandError);
    }

    // =========================================================================
    // Objectives
    // =========================================================================

    fn evaluate_objectives(&mut self) {
        if self.objective_docs.is_empty() || self.stop_reason.is_some() {
            return;
        }
        let statuses = objectives::evaluate(&self.state, &self.objective_docs);
        if statuses != self.last_statuses {
            self.emit(
                "ev_obj_",
                "objective_update",
                json!({ "objectives": statuses }),
            );
            self.last_statuses = statuses.clone();
        }
        if let Some(outcome) = objectives::battle_outcome(&statuses) {
            self.emit(
                "ev_done_",
                "battle_end",
                json!({
                    "outcome": outcome,
                    "winner_team": objectives::winner_team(&self.state),
                }),
            );
            self.stop_reason = Some(StopReason::BattleEnd);
        }
    }

    // =========================================================================
    // Mission events
    // =========================================================================

    fn run_one_mission_event(&mut self) -> bool {
        let candidate = self
            .mission_events
            .iter()
            .enumerate()
            .find(|(_, m)| self.mission_eligible(m))
            .map(|(i, _)| i);
        let Some(index) = candidate else {
            return false;
        };
        let mission = self.mission_events[index].clone();

        let key = format!(
            "{}:{}:{}",
            self.state.round_number, self.state.turn_index, mission.id
        );
        self.mission_fired.insert(key);
        if mission.once {
            self.mission_once_done.insert(mission.id.clone());
        }

        let (branch, commands) = match &mission.if_flag {
            Some(flag) => {
                let current = self.state.flags.get(flag).copied().unwrap_or(false);
                if current == mission.if_flag_value {
                    ("then", &mission.then_commands)
                } else {
                    ("else", &mission.else_commands)
                }
            }
            None => ("commands", &mission.commands),
        };

        self.emit(
            "ev_mission_",
            "mission_event",
            json!({
                "mission_id": mission.id,
                "trigger": mission.trigger,
                "branch": branch,
                "command_count": commands.len() as u32,
            }),
        );

        for raw in commands {
            if self.stop_reason.is_some() {
                break;
            }
            if self.dispatch_raw(raw, true) {
                continue;
            }
            break;
        }
        true
    }

    fn mission_eligible(&self, mission: &MissionEventDoc) -> bool {
        if self.mission_once_done.contains(&mission.id) {
            return false;
        }
        let key = format!(
            "{}:{}:{}",
            self.state.round_number, self.state.turn_index, mission.id
        );
        if self.mission_fired.contains(&key) {
            return false;
        }

        let state = &self.state;
        let trigger_ok = match mission.trigger {
            TriggerKind::TurnStart => true,
            TriggerKind::RoundStart => state.turn_index == 0,
            TriggerKind::UnitDead => mission
                .unit
                .as_ref()
                .map(|id| {
                    state
                        .unit(&UnitId::from(id.as_str()))
                        .map(|u| !u.alive())
                        .unwrap_or(true)
                })
                .unwrap_or(false),
            TriggerKind::UnitAlive => mission
                .unit
                .as_ref()
                .map(|id| {
                    state
                        .unit(&UnitId::from(id.as_str()))
                        .map(|u| u.alive())
                        .unwrap_or(false)
                })
                .unwrap_or(false),
            TriggerKind::FlagSet => mission
                .flag
                .as_ref()
                .map(|flag| {
                    state.flags.get(flag).copied().unwrap_or(false)
                        == mission.value.unwrap_or(true)
                })
                .unwrap_or(false),
        };
        if !trigger_ok {
            return false;
        }

        if let Some(round) = mission.round {
            if state.round_number != round {
                return false;
            }
        }
        if let Some(start) = mission.start_round {
            if state.round_number < start {
                return false;
            }
        }
        if let Some(end) = mission.end_round {
            if state.round_number > end {
                return false;
            }
        }
        if let Some(active) = &mission.active_unit {
            if state.active_unit_id().as_str() != active {
                return false;
            }
        }
        if let Some(flag) = &mission.enabled_flag {
            if !state.flags.get(flag).copied().unwrap_or(false) {
                return false;
            }
        }
        if let Some(flag) = &mission.disabled_flag {
            if state.flags.get(flag).copied().unwrap_or(false) {
                return false;
            }
        }
        true
    }

    // =========================================================================
    // Hazard routines
    // =========================================================================

    fn run_hazard_routines(&mut self) -> bool {
        let mut eligible: Vec<HazardRoutineDoc> = self
            .doc
            .hazard_routines
            .iter()
            .filter(|r| self.hazard_eligible(r))
            .cloned()
            .collect();
        if eligible.is_empty() {
            return false;
        }
        eligible.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));

        for routine in eligible {
            if self.stop_reason.is_some() {
                break;
            }
            // The turn may have advanced via auto_end_turn; re-check.
            if !self.hazard_eligible(&routine) {
                continue;
            }
            let key = format!(
                "{}:{}:{}",
                self.state.round_number, self.state.turn_index, routine.id
            );
            self.hazard_fired_turn.insert(key);
            *self.hazard_counts.entry(routine.id.clone()).or_insert(0) += 1;

            let actor = UnitId::from(routine.unit_id.as_str());
            let command = Command::RunHazardRoutine {
                actor: actor.clone(),
                hazard_id: routine.hazard_id.clone(),
                source_name: routine.source_name.clone(),
                source_type: routine.source_type.clone(),
                target_policy: routine.target_policy,
                center_x: routine.center_x,
                center_y: routine.center_y,
                target: routine.target.as_ref().map(|t| UnitId::from(t.as_str())),
            };
            if !self.dispatch(&command, true) {
                break;
            }
            if routine.auto_end_turn
                && self.stop_reason.is_none()
                && self.state.active_unit_id() == &actor
            {
                self.dispatch(&Command::EndTurn { actor: actor.clone() }, true);
            }
        }
        true
    }

    fn hazard_eligible(&self, routine: &HazardRoutineDoc) -> bool {
        let state = &self.state;
        if state.active_unit_id().as_str() != routine.unit_id {
            return false;
        }
        if let Some(max) = routine.max_triggers {
            if self.hazard_counts.get(&routine.id).copied().unwrap_or(0) >= max {
                return false;
            }
        }
        let key = format!(
            "{}:{}:{}",
            state.round_number, state.turn_index, routine.id
        );
        if self.hazard_fired_turn.contains(&key) {
            return false;
        }
        let round = state.round_number;
        if round < routine.start_round {
            return false;
        }
        if let Some(end) = routine.end_round {
            if round > end {
                return false;
            }
        }
        if (round - routine.start_round) % routine.cadence_rounds != 0 {
            return false;
        }
        if let Some(flag) = &routine.enabled_flag {
            if !state.flags.get(flag).copied().unwrap_or(false) {
                return false;
            }
        }
        if let Some(flag) = &routine.disabled_flag {
            if state.flags.get(flag).copied().unwrap_or(false) {
                return false;
            }
        }
        true
    }

    // =========================================================================
    // Enemy policy
    // =========================================================================

    fn run_policy_turn(&mut self, policy: crate::scenario::EnemyPolicyDoc) {
        let actor = self.state.active_unit_id().clone();
        let decision = enemy_policy::decide(&self.state, &policy);

        let mut payload = json!({
            "unit": actor.as_str(),
            "action": policy.action,
            "command": decision.command.type_name(),
        });
        if let Some(rationale) = &decision.rationale {
            payload["rationale"] = rationale.clone();
        }
        self.emit("ev_policy_", "enemy_policy_decision", payload);

        let was_end_turn = matches!(decision.command, Command::EndTurn { .. });
        let outcome = self
            .materialize_typed(&decision.command)
            .and_then(|command| self.try_apply(&command, true));

        if let Err(first_error) = outcome {
            // Recover once with an explicit end_turn before surfacing.
            let retry = self.try_apply(&Command::EndTurn { actor: actor.clone() }, true);
            match retry {
                Ok(()) => self.emit(
                    "ev_policy_",
                    "enemy_policy_recovered",
                    json!({ "unit": actor.as_str(), "error": first_error }),
                ),
                Err(_) => {
                    let raw = serde_json::to_value(&decision.command).unwrap_or(Value::Null);
                    self.command_error(raw, &first_error);
                }
            }
            return;
        }

        if policy.auto_end_turn
            && !was_end_turn
            && self.stop_reason.is_none()
            && self.state.active_unit_id() == &actor
            && self.state.unit(&actor).map(|u| u.alive()).unwrap_or(false)
        {
            self.dispatch(&Command::EndTurn { actor }, true);
        }
    }

    // =========================================================================
    // Content-entry materialization
    // =========================================================================

    fn materialize_typed(&self, command: &Command) -> Result<Command, String> {
        let raw = serde_json::to_value(command).map_err(|e| e.to_string())?;
        self.materialize(&raw)
    }

    /// Merge a content entry's payload defaults under the caller's fields,
    /// derive the domain id, and attach the entry intent.
    fn materialize(&self, raw: &Value) -> Result<Command, String> {
        let map = raw.as_object().ok_or("command must be an object")?;
        let entry_id = map
            .get("content_entry_id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty());

        let Some(entry_id) = entry_id else {
            return serde_json::from_value(raw.clone()).map_err(|e| e.to_string());
        };

        let command_type = map
            .get("type")
            .and_then(Value::as_str)
            .ok_or("command needs a string type")?;
        if !TEMPLATED_COMMANDS.contains(&command_type) {
            return Err(format!(
                "content entries cannot materialize command type {command_type:?}"
            ));
        }

        let content = self
            .content
            .as_ref()
            .ok_or("command references a content entry but no content pack is resolved")?;
        let entry = content
            .entry(&EntryId::from(entry_id))
            .ok_or_else(|| format!("unknown content entry {entry_id:?}"))?;

        let entry_command_type = entry
            .payload
            .get("command_type")
            .and_then(Value::as_str)
            .ok_or_else(|| format!("content entry {entry_id:?} has no command_type"))?;
        if entry_command_type != command_type {
            return Err(format!(
                "content entry {entry_id:?} materializes {entry_command_type:?}, not {command_type:?}"
            ));
        }

        let mut merged = map.clone();
        for (key, value) in &entry.payload {
            if key == "command_type" {
                continue;
            }
            merged.entry(key.clone()).or_insert_with(|| value.clone());
        }

        // Derive the domain id from the entry id's suffix when absent.
        let id_field = match command_type {
            "cast_spell" => "spell_id",
            "use_feat" => "feat_id",
            "use_item" => "item_id",
            _ => "interact_id",
        };
        let missing_id = merged
            .get(id_field)
            .and_then(Value::as_str)
            .map(str::is_empty)
            .unwrap_or(true);
        if missing_id {
            let derived = entry_id.split_once('.').map(|(_, rest)| rest).unwrap_or(entry_id);
            merged.insert(id_field.to_string(), json!(derived));
        }

        let mut intent = json!({
            "entry_id": entry_id,
            "tags": entry.tags,
        });
        if let Some(uses) = entry.payload.get("uses_per_day") {
            intent["uses_per_day"] = uses.clone();
        }
        merged.insert("content_entry".to_string(), intent);

        serde_json::from_value(Value::Object(merged)).map_err(|e| e.to_string())
    }
}
