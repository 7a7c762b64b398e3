use std::collections::{HashMap, VecDeque};

use chrono::Utc;

use crate::models::{new_message_id, Message};

/// Read-only index over one room's messages.
///
/// Built fresh for every query; construction is linear in the message count.
pub struct ConversationTree<'a> {
    room_id: &'a str,
    by_id: HashMap<&'a str, &'a Message>,
    children: HashMap<&'a str, Vec<&'a Message>>,
}

impl<'a> ConversationTree<'a> {
    pub fn new(room_id: &'a str, messages: &'a [Message]) -> Self {
        let mut by_id = HashMap::with_capacity(messages.len());
        let mut children: HashMap<&str, Vec<&Message>> = HashMap::new();
        for msg in messages {
            by_id.insert(msg.id.as_str(), msg);
            children.entry(msg.parent_id.as_str()).or_default().push(msg);
        }
        Self {
            room_id,
            by_id,
            children,
        }
    }

    pub fn get(&self, id: &str) -> Option<&'a Message> {
        self.by_id.get(id).copied()
    }

    /// Ancestors of `focus_id`, oldest first, excluding the synthetic room root.
    pub fn ancestors_of(&self, focus_id: &str) -> Vec<&'a Message> {
        let mut ancestors = Vec::new();
        let Some(mut current) = self.get(focus_id) else {
            return ancestors;
        };
        while current.parent_id != self.room_id {
            match self.get(&current.parent_id) {
                Some(parent) => {
                    ancestors.push(parent);
                    current = parent;
                }
                None => break,
            }
        }
        ancestors.reverse();
        ancestors
    }

    /// Messages reached from `focus_id` by following default children only.
    pub fn descendants_of(&self, focus_id: &str) -> Vec<&'a Message> {
        let mut descendants = Vec::new();
        let mut queue: VecDeque<&Message> = self.default_children(focus_id).collect();
        while let Some(current) = queue.pop_front() {
            descendants.push(current);
            queue.extend(self.default_children(&current.id));
        }
        descendants
    }

    /// The linear conversation shown for `focus_id`; empty if it is unknown.
    pub fn materialize_path(&self, focus_id: &str) -> Vec<&'a Message> {
        let Some(focus) = self.get(focus_id) else {
            return Vec::new();
        };
        let mut path = self.ancestors_of(focus_id);
        path.push(focus);
        path.extend(self.descendants_of(focus_id));
        path
    }

    /// Siblings of `focus_id` (itself included) ordered by branch number.
    pub fn peers_of(&self, focus_id: &str) -> Vec<&'a Message> {
        let Some(focus) = self.get(focus_id) else {
            return Vec::new();
        };
        let mut peers = self.children_of(&focus.parent_id).to_vec();
        peers.sort_by_key(|m| m.slot().number());
        peers
    }

    /// Root-level message with branch 1, where a newly opened room starts.
    pub fn root_default_branch(&self) -> Option<&'a Message> {
        self.children_of(self.room_id)
            .iter()
            .copied()
            .find(|m| m.slot().is_default())
    }

    /// Lowest-numbered root, for rooms whose first branch is missing.
    pub fn first_root(&self) -> Option<&'a Message> {
        self.children_of(self.room_id)
            .iter()
            .copied()
            .min_by_key(|m| m.slot().number())
    }

    /// Branch number a new child of `parent_id` must take.
    pub fn next_branch_num(&self, parent_id: &str) -> u32 {
        self.children_of(parent_id)
            .iter()
            .map(|m| m.slot().number())
            .max()
            .unwrap_or(0)
            + 1
    }

    fn children_of(&self, parent_id: &str) -> &[&'a Message] {
        self.children.get(parent_id).map(Vec::as_slice).unwrap_or(&[])
    }

    fn default_children(&self, parent_id: &str) -> impl Iterator<Item = &'a Message> + '_ {
        self.children_of(parent_id)
            .iter()
            .copied()
            .filter(|m| m.slot().is_default())
    }
}

/// New collection with `message` appended. The input is left untouched.
pub fn append_message(messages: &[Message], message: Message) -> Vec<Message> {
    let mut next = Vec::with_capacity(messages.len() + 1);
    next.extend_from_slice(messages);
    next.push(message);
    next
}

/// Build the sibling that replaces `original_id` with `new_content`.
///
/// Returns `None` when the id is not in `messages`. The caller appends the
/// result; the original message is never modified.
pub fn fork_edit(messages: &[Message], original_id: &str, new_content: &str) -> Option<Message> {
    let original = messages.iter().find(|m| m.id == original_id)?;
    let branch_num = messages
        .iter()
        .filter(|m| m.parent_id == original.parent_id)
        .map(|m| m.slot().number())
        .max()
        .unwrap_or(0)
        + 1;

    Some(Message {
        id: new_message_id(),
        content: new_content.to_string(),
        branch_num: Some(branch_num),
        created_at: Utc::now(),
        ..original.clone()
    })
}
