//! Strip containers: `Timeline` (a strip list with channels) and `Editing`
//! (the top-level timeline plus the stack of entered meta strips).

use std::collections::{HashMap, HashSet};

use log::trace;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::strip::{Strip, StripKind};

/// Most inputs an effect strip can take.
pub const MAX_EFFECT_INPUTS: usize = 3;

/// Channel (stacking lane) settings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Channel {
    pub index: i32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mute: bool,
}

/// Structural timeline errors.
#[derive(Debug, Clone, PartialEq)]
pub enum TimelineError {
    DuplicateStrip(Uuid),
    UnknownInput { strip: Uuid, input: Uuid },
    TooManyInputs(Uuid),
    InputCycle(Uuid),
    NotMeta(Uuid),
}

impl std::fmt::Display for TimelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimelineError::DuplicateStrip(id) => write!(f, "Duplicate strip id {}", id),
            TimelineError::UnknownInput { strip, input } => {
                write!(f, "Strip {} references unknown input {}", strip, input)
            }
            TimelineError::TooManyInputs(id) => {
                write!(f, "Strip {} has more than {} inputs", id, MAX_EFFECT_INPUTS)
            }
            TimelineError::InputCycle(id) => write!(f, "Effect input cycle through strip {}", id),
            TimelineError::NotMeta(id) => write!(f, "Strip {} is not a meta strip", id),
        }
    }
}

impl std::error::Error for TimelineError {}

/// Ordered strip list with per-channel settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Timeline {
    #[serde(default)]
    pub strips: Vec<Strip>,
    #[serde(default)]
    pub channels: Vec<Channel>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a strip, returning its id.
    ///
    /// Effect inputs must already be in the timeline. A strip that would
    /// break validation is not added.
    pub fn add_strip(&mut self, strip: Strip) -> Result<Uuid, TimelineError> {
        let id = strip.uuid;
        self.strips.push(strip);
        if let Err(e) = self.validate() {
            self.strips.pop();
            return Err(e);
        }
        Ok(id)
    }

    /// Point an effect strip at its inputs.
    pub fn set_effect_inputs(&mut self, effect: Uuid, new_inputs: Vec<Uuid>) -> Result<(), TimelineError> {
        if new_inputs.len() > MAX_EFFECT_INPUTS {
            return Err(TimelineError::TooManyInputs(effect));
        }
        for input in &new_inputs {
            if self.get(*input).is_none() {
                return Err(TimelineError::UnknownInput { strip: effect, input: *input });
            }
        }
        let strip = self
            .strips
            .iter_mut()
            .find(|s| s.uuid == effect)
            .ok_or(TimelineError::UnknownInput { strip: effect, input: effect })?;
        let previous = match &mut strip.kind {
            StripKind::Effect { inputs, .. } => std::mem::replace(inputs, new_inputs),
            _ => return Err(TimelineError::UnknownInput { strip: effect, input: effect }),
        };
        if let Err(e) = self.validate() {
            // Roll back so the timeline never holds a cycle
            if let Some(StripKind::Effect { inputs, .. }) =
                self.strips.iter_mut().find(|s| s.uuid == effect).map(|s| &mut s.kind)
            {
                *inputs = previous;
            }
            return Err(e);
        }
        Ok(())
    }

    /// Strip in this list (not nested).
    pub fn get(&self, uuid: Uuid) -> Option<&Strip> {
        self.strips.iter().find(|s| s.uuid == uuid)
    }

    /// Strip anywhere in this list or nested meta strips.
    pub fn find(&self, uuid: Uuid) -> Option<&Strip> {
        for strip in &self.strips {
            if strip.uuid == uuid {
                return Some(strip);
            }
            if let StripKind::Meta { timeline } = &strip.kind
                && let Some(found) = timeline.find(uuid)
            {
                return Some(found);
            }
        }
        None
    }

    pub fn channel_muted(&self, channel: i32) -> bool {
        self.channels.iter().any(|c| c.index == channel && c.mute)
    }

    /// Strip mute flag or its channel's mute flag.
    pub fn is_muted(&self, strip: &Strip) -> bool {
        strip.flags.mute || self.channel_muted(strip.channel)
    }

    /// Strips composited at `frame`, bottom channel first.
    ///
    /// `chanshown > 0` limits to channels `<= chanshown`. Sound and muted
    /// strips are dropped, as are strips consumed as inputs by a rendered
    /// effect on a higher channel.
    pub fn rendered_strips(&self, frame: f32, chanshown: i32) -> Vec<&Strip> {
        let mut strips: Vec<&Strip> = self
            .strips
            .iter()
            .filter(|s| s.intersects(frame))
            .filter(|s| chanshown <= 0 || s.channel <= chanshown)
            .filter(|s| !s.is_sound() && !self.is_muted(s))
            .collect();

        // Input id -> highest channel of an effect consuming it
        let mut consumed: HashMap<Uuid, i32> = HashMap::new();
        for effect in &strips {
            for input in effect.effect_inputs() {
                let channel = consumed.entry(*input).or_insert(effect.channel);
                *channel = (*channel).max(effect.channel);
            }
        }
        strips.retain(|s| consumed.get(&s.uuid).is_none_or(|&above| s.channel >= above));
        strips.sort_by_key(|s| s.channel);

        trace!("frame {}: {} rendered strips", frame, strips.len());
        strips
    }

    /// Ids of strips intersecting `frame` on any channel, nested metas included.
    pub fn visible_ids(&self, frame: f32) -> HashSet<Uuid> {
        let mut ids = HashSet::new();
        for strip in self.strips.iter().filter(|s| s.intersects(frame)) {
            ids.insert(strip.uuid);
            if let StripKind::Meta { timeline } = &strip.kind {
                let local = strip.start as f32 + strip.give_frame_index(frame);
                ids.extend(timeline.visible_ids(local));
            }
        }
        ids
    }

    /// Check ids are unique and effect inputs form a DAG.
    ///
    /// An effect may not reference itself, an unknown strip, or any strip
    /// that (transitively) consumes it.
    pub fn validate(&self) -> Result<(), TimelineError> {
        let mut seen = HashSet::new();
        self.collect_ids(&mut seen)?;
        self.validate_level()
    }

    fn collect_ids(&self, seen: &mut HashSet<Uuid>) -> Result<(), TimelineError> {
        for strip in &self.strips {
            if !seen.insert(strip.uuid) {
                return Err(TimelineError::DuplicateStrip(strip.uuid));
            }
            if let StripKind::Meta { timeline } = &strip.kind {
                timeline.collect_ids(seen)?;
            }
        }
        Ok(())
    }

    fn validate_level(&self) -> Result<(), TimelineError> {
        let by_id: HashMap<Uuid, &Strip> = self.strips.iter().map(|s| (s.uuid, s)).collect();

        for strip in &self.strips {
            let inputs = strip.effect_inputs();
            if inputs.len() > MAX_EFFECT_INPUTS {
                return Err(TimelineError::TooManyInputs(strip.uuid));
            }
            for input in inputs {
                if !by_id.contains_key(input) {
                    return Err(TimelineError::UnknownInput { strip: strip.uuid, input: *input });
                }
            }
        }

        // DFS with white/grey/black marking
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }
        fn visit(
            id: Uuid,
            by_id: &HashMap<Uuid, &Strip>,
            marks: &mut HashMap<Uuid, Mark>,
        ) -> Result<(), TimelineError> {
            match marks.get(&id) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => return Err(TimelineError::InputCycle(id)),
                None => {}
            }
            marks.insert(id, Mark::Visiting);
            if let Some(strip) = by_id.get(&id) {
                for input in strip.effect_inputs() {
                    visit(*input, by_id, marks)?;
                }
            }
            marks.insert(id, Mark::Done);
            Ok(())
        }

        let mut marks = HashMap::new();
        for strip in &self.strips {
            visit(strip.uuid, &by_id, &mut marks)?;
        }

        for strip in &self.strips {
            if let StripKind::Meta { timeline } = &strip.kind {
                timeline.validate_level()?;
            }
        }
        Ok(())
    }
}

/// Top-level timeline plus the path of entered meta strips.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Editing {
    #[serde(default)]
    pub timeline: Timeline,
    /// Meta strips entered for editing, outermost first
    #[serde(default)]
    pub meta_stack: Vec<Uuid>,
}

impl Editing {
    pub fn new(timeline: Timeline) -> Self {
        Self { timeline, meta_stack: Vec::new() }
    }

    /// Timeline at meta depth `depth` (0 = top level).
    pub fn timeline_at_depth(&self, depth: usize) -> Result<&Timeline, TimelineError> {
        let mut current = &self.timeline;
        for id in self.meta_stack.iter().take(depth) {
            current = match current.get(*id).map(|s| &s.kind) {
                Some(StripKind::Meta { timeline }) => timeline,
                _ => return Err(TimelineError::NotMeta(*id)),
            };
        }
        Ok(current)
    }

    /// Timeline being edited (innermost entered meta, or the top level).
    pub fn current_timeline(&self) -> Result<&Timeline, TimelineError> {
        self.timeline_at_depth(self.meta_stack.len())
    }

    /// Timeline to render and the channel limit to apply.
    ///
    /// Negative `chanshown` inside a meta pops `-chanshown` levels and shows
    /// every channel of that level.
    pub fn active_timeline(&self, chanshown: i32) -> Result<(&Timeline, i32), TimelineError> {
        if chanshown < 0 && !self.meta_stack.is_empty() {
            let depth = (self.meta_stack.len() as i32 + chanshown).max(0) as usize;
            return Ok((self.timeline_at_depth(depth)?, 0));
        }
        Ok((self.current_timeline()?, chanshown))
    }

    pub fn enter_meta(&mut self, meta: Uuid) -> Result<(), TimelineError> {
        match self.current_timeline()?.get(meta).map(|s| &s.kind) {
            Some(StripKind::Meta { .. }) => {
                self.meta_stack.push(meta);
                Ok(())
            }
            _ => Err(TimelineError::NotMeta(meta)),
        }
    }

    pub fn exit_meta(&mut self) -> Option<Uuid> {
        self.meta_stack.pop()
    }
}
