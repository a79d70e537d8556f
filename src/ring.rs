//! Fixed-capacity ring buffer indexed by absolute timeslot.

/// Occupied slot: the absolute timeslot it was written for, plus the value.
///
/// Storing the timeslot lets `get` tell a live cell from a stale one left
/// behind by a previous wrap of the ring.
#[derive(Debug, Clone)]
struct Slot<T> {
    timeslot: usize,
    value: T,
}

/// A fixed-capacity circular buffer of optional cells, indexed by absolute
/// timeslot via `timeslot % capacity`.
///
/// The capacity is a hard limit on how far ahead the horizon may extend.
/// Reads only match a slot whose stored timeslot equals the requested one,
/// so a wrapped-around write never masquerades as a future cell.
#[derive(Debug, Clone)]
pub struct RingHorizon<T> {
    slots: Vec<Option<Slot<T>>>,
    capacity: usize,
}

impl<T> RingHorizon<T> {
    /// Creates an empty ring with the given capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be > 0");
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { slots, capacity }
    }

    /// Maximum number of timeslots the ring can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the cell at `timeslot`, if one is live there.
    pub fn get(&self, timeslot: usize) -> Option<&T> {
        self.slots[timeslot % self.capacity]
            .as_ref()
            .filter(|slot| slot.timeslot == timeslot)
            .map(|slot| &slot.value)
    }

    /// Mutable access to the cell at `timeslot`, if one is live there.
    pub fn get_mut(&mut self, timeslot: usize) -> Option<&mut T> {
        let capacity = self.capacity;
        self.slots[timeslot % capacity]
            .as_mut()
            .filter(|slot| slot.timeslot == timeslot)
            .map(|slot| &mut slot.value)
    }

    /// Stores `value` at `timeslot`, overwriting whatever occupied the slot.
    pub fn set(&mut self, timeslot: usize, value: T) {
        let index = timeslot % self.capacity;
        self.slots[index] = Some(Slot { timeslot, value });
    }

    /// Returns the cell at `timeslot`, inserting `default()` if the slot is
    /// empty or stale.
    pub fn get_or_insert_with<F: FnOnce() -> T>(&mut self, timeslot: usize, default: F) -> &mut T {
        let index = timeslot % self.capacity;
        let stale = !matches!(&self.slots[index], Some(slot) if slot.timeslot == timeslot);
        if stale {
            self.slots[index] = Some(Slot {
                timeslot,
                value: default(),
            });
        }
        match &mut self.slots[index] {
            Some(slot) => &mut slot.value,
            None => unreachable!("slot was just populated"),
        }
    }

    /// Drops every slot stale from a previous wrap, i.e. written for a
    /// timeslot earlier than `from`. Must run before any write that may
    /// extend the horizon.
    pub fn clean(&mut self, from: usize) {
        for slot in &mut self.slots {
            if matches!(slot, Some(s) if s.timeslot < from) {
                *slot = None;
            }
        }
    }

    /// Empties the ring.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
    }

    /// Length of the contiguous run of live cells starting at `from`.
    pub fn active_length(&self, from: usize) -> usize {
        let mut length = 0;
        while length < self.capacity && self.get(from + length).is_some() {
            length += 1;
        }
        length
    }

    /// Iterates `(timeslot, cell)` over the contiguous active prefix
    /// starting at `from`.
    pub fn iter_active(&self, from: usize) -> impl Iterator<Item = (usize, &T)> + '_ {
        let length = self.active_length(from);
        (from..from + length).filter_map(move |ts| self.get(ts).map(|cell| (ts, cell)))
    }

    /// Mutable counterpart of [`iter_active`](Self::iter_active): yields
    /// `(timeslot, cell)` for every live cell of the active prefix starting
    /// at `from`. Cells come out in buffer order, not timeslot order.
    pub fn iter_active_mut(&mut self, from: usize) -> impl Iterator<Item = (usize, &mut T)> + '_ {
        let end = from + self.active_length(from);
        self.slots.iter_mut().filter_map(move |slot| {
            slot.as_mut()
                .filter(|s| (from..end).contains(&s.timeslot))
                .map(|s| (s.timeslot, &mut s.value))
        })
    }
}
