use super::value::{hash_str, ObjString, Value};
use std::rc::Rc;

const INITIAL_CAPACITY: usize = 8;

/// A string-keyed hash table with open addressing and linear probing.
/// Keys are interned strings, so key comparison is pointer comparison.
/// Deleting plants a tombstone so probe sequences stay unbroken; lookups
/// walk through tombstones and inserts may reuse them.
pub struct Table {
    // occupied slots plus tombstones, the figure the load factor is based on
    count: usize,
    entries: Vec<Entry>,
}

#[derive(Clone)]
enum Entry {
    Vacant,
    Tombstone,
    Occupied(Rc<ObjString>, Value),
}

impl Table {
    pub fn new() -> Self {
        Self {
            count: 0,
            entries: Vec::new(),
        }
    }

    // capacity is always a power of two, so masking replaces the modulo
    fn find_slot(entries: &[Entry], key: &Rc<ObjString>) -> usize {
        let mut index = key.hash() as usize & (entries.len() - 1);
        let mut tombstone = None;

        loop {
            match &entries[index] {
                Entry::Vacant => return tombstone.unwrap_or(index),
                Entry::Tombstone => {
                    if tombstone.is_none() {
                        tombstone = Some(index);
                    }
                }
                Entry::Occupied(resident, _) => {
                    if Rc::ptr_eq(resident, key) {
                        return index;
                    }
                }
            }
            index = (index + 1) & (entries.len() - 1);
        }
    }

    pub fn get(&self, key: &Rc<ObjString>) -> Option<&Value> {
        if self.entries.is_empty() {
            return None;
        }
        match &self.entries[Self::find_slot(&self.entries, key)] {
            Entry::Occupied(_, value) => Some(value),
            _ => None,
        }
    }

    /// Inserts or overwrites. Returns whether the key was absent before.
    pub fn set(&mut self, key: Rc<ObjString>, value: Value) -> bool {
        if (self.count + 1) * 4 > self.entries.len() * 3 {
            self.grow();
        }

        let index = Self::find_slot(&self.entries, &key);
        match &mut self.entries[index] {
            Entry::Occupied(_, resident) => {
                *resident = value;
                false
            }
            entry => {
                // reusing a tombstone does not change the load
                if matches!(entry, Entry::Vacant) {
                    self.count += 1;
                }
                *entry = Entry::Occupied(key, value);
                true
            }
        }
    }

    /// Returns whether the key was present.
    pub fn delete(&mut self, key: &Rc<ObjString>) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let index = Self::find_slot(&self.entries, key);
        match &self.entries[index] {
            Entry::Occupied(..) => {
                self.entries[index] = Entry::Tombstone;
                true
            }
            _ => false,
        }
    }

    /// The content-based probe used by interning: compares hash, then
    /// length, then bytes. Everywhere else keys compare by pointer.
    pub fn find_string(&self, chars: &str, hash: u32) -> Option<Rc<ObjString>> {
        if self.entries.is_empty() {
            return None;
        }

        let mut index = hash as usize & (self.entries.len() - 1);
        loop {
            match &self.entries[index] {
                Entry::Vacant => return None,
                Entry::Tombstone => {}
                Entry::Occupied(resident, _) => {
                    if resident.hash() == hash
                        && resident.len() == chars.len()
                        && resident.as_str() == chars
                    {
                        return Some(Rc::clone(resident));
                    }
                }
            }
            index = (index + 1) & (self.entries.len() - 1);
        }
    }

    /// Returns the unique resident string for these bytes, inserting a new
    /// one keyed to `nil` if none exists yet.
    pub fn intern(&mut self, chars: &str) -> Rc<ObjString> {
        let hash = hash_str(chars);
        if let Some(resident) = self.find_string(chars, hash) {
            return resident;
        }

        let string = Rc::new(ObjString::new(chars));
        self.set(Rc::clone(&string), Value::Nil);
        string
    }

    fn grow(&mut self) {
        let capacity = if self.entries.is_empty() {
            INITIAL_CAPACITY
        } else {
            self.entries.len() * 2
        };

        // tombstones are dropped on the way, only live entries carry over
        let old = std::mem::replace(&mut self.entries, vec![Entry::Vacant; capacity]);
        self.count = 0;
        for entry in old {
            if let Entry::Occupied(key, value) = entry {
                let index = Self::find_slot(&self.entries, &key);
                self.entries[index] = Entry::Occupied(key, value);
                self.count += 1;
            }
        }
    }

    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }
}
