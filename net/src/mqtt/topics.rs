//! Subscribed-topic table.
//!
//! Slot 0 is reserved so that an index is never zero; a full table is an
//! error, never a handle.

use core::fmt;

use heapless::String;

use crate::types::NetError;

pub const MAX_TOPICS: usize = 8;
pub const MAX_TOPIC_LEN: usize = 80;

pub type TopicName = String<MAX_TOPIC_LEN>;

/// Index of an occupied topic slot, always in `1..MAX_TOPICS`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TopicIndex(u8);

impl TopicIndex {
    #[inline]
    pub const fn get(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TopicIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Copy `name` into a bounded topic string.
pub fn topic_name(name: &str) -> Result<TopicName, NetError> {
    if name.is_empty() {
        return Err(NetError::InvalidArgument);
    }
    let mut out = TopicName::new();
    out.push_str(name).map_err(|_| NetError::TopicTooLong)?;
    Ok(out)
}

pub struct TopicTable {
    slots: [Option<TopicName>; MAX_TOPICS],
}

impl Default for TopicTable {
    fn default() -> Self {
        Self::new()
    }
}

impl TopicTable {
    pub const fn new() -> Self {
        Self {
            slots: [const { None }; MAX_TOPICS],
        }
    }

    /// Store `name` in the first free slot. A name already present keeps
    /// its slot.
    pub fn add_topic(&mut self, name: &str) -> Result<TopicIndex, NetError> {
        let stored = topic_name(name)?;
        if let Some(index) = self.get_topic_index(name) {
            return Ok(index);
        }
        let slot = (1..MAX_TOPICS)
            .find(|&i| self.slots[i].is_none())
            .ok_or(NetError::TopicTableFull)?;
        self.slots[slot] = Some(stored);
        Ok(TopicIndex(slot as u8))
    }

    /// # Panics
    /// If `index` is outside the table.
    pub fn remove_topic(&mut self, index: TopicIndex) -> Option<TopicName> {
        assert!(index.get() < MAX_TOPICS, "topic index out of range");
        self.slots[index.get()].take()
    }

    pub fn get_topic_index(&self, name: &str) -> Option<TopicIndex> {
        (1..MAX_TOPICS)
            .find(|&i| self.slots[i].as_deref() == Some(name))
            .map(|i| TopicIndex(i as u8))
    }

    /// # Panics
    /// If `index` is outside the table.
    pub fn name(&self, index: TopicIndex) -> Option<&str> {
        assert!(index.get() < MAX_TOPICS, "topic index out of range");
        self.slots[index.get()].as_deref()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TopicIndex, &str)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .skip(1)
            .filter_map(|(i, s)| s.as_deref().map(|name| (TopicIndex(i as u8), name)))
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_slot_is_one() {
        let mut table = TopicTable::new();
        let idx = table.add_topic("uta_iot/feed/temp").unwrap();
        assert_eq!(idx.get(), 1);
        assert_eq!(table.name(idx), Some("uta_iot/feed/temp"));
        assert_eq!(table.get_topic_index("uta_iot/feed/temp"), Some(idx));
    }

    #[test]
    fn names_stay_unique() {
        let mut table = TopicTable::new();
        let a = table.add_topic("a").unwrap();
        let b = table.add_topic("a").unwrap();
        assert_eq!(a, b);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn full_table_is_an_error() {
        let mut table = TopicTable::new();
        let names = ["t1", "t2", "t3", "t4", "t5", "t6", "t7"];
        for name in names {
            table.add_topic(name).unwrap();
        }
        assert_eq!(table.add_topic("t8"), Err(NetError::TopicTableFull));

        let idx = table.get_topic_index("t3").unwrap();
        assert!(table.remove_topic(idx).is_some());
        assert_eq!(table.add_topic("t8"), Ok(idx));
    }

    #[test]
    fn rejects_bad_names() {
        let mut table = TopicTable::new();
        let long = [b'x'; MAX_TOPIC_LEN + 1];
        let long = core::str::from_utf8(&long).unwrap();
        assert_eq!(table.add_topic(long), Err(NetError::TopicTooLong));
        assert_eq!(table.add_topic(""), Err(NetError::InvalidArgument));
    }
}
