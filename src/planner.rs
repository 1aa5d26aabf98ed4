//! Volume planning.
//!
//! Groups the enabled chapters of a [`ChapterList`] into numbered volumes of
//! bounded size. A plan borrows the chapters it groups and is rebuilt from
//! scratch whenever the order, the enabled set, the group size or the start
//! volume changes.

use std::num::NonZeroU32;

use log::debug;

use crate::types::{Chapter, Plan, Volume};

/// Groups ordered chapters into consecutively numbered volumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumePlanner {
    group_size: NonZeroU32,
    start_volume: NonZeroU32,
}

impl Default for VolumePlanner {
    fn default() -> Self {
        Self {
            group_size: NonZeroU32::new(10).unwrap_or(NonZeroU32::MIN),
            start_volume: NonZeroU32::MIN,
        }
    }
}

impl VolumePlanner {
    /// Creates a planner. Values below 1 are raised to 1.
    pub fn new(group_size: u32, start_volume: u32) -> Self {
        Self {
            group_size: NonZeroU32::new(group_size).unwrap_or(NonZeroU32::MIN),
            start_volume: NonZeroU32::new(start_volume).unwrap_or(NonZeroU32::MIN),
        }
    }

    pub fn group_size(&self) -> u32 {
        self.group_size.get()
    }

    pub fn start_volume(&self) -> u32 {
        self.start_volume.get()
    }

    /// Builds a plan from chapters in production order.
    ///
    /// Disabled chapters are skipped while the relative order of the rest is
    /// kept. The enabled chapters are cut into consecutive groups of at most
    /// `group_size`, the final group possibly smaller, numbered from
    /// `start_volume` upwards. No enabled chapter yields an empty plan.
    pub fn plan<'a, I>(&self, chapters: I) -> Plan<'a>
    where
        I: IntoIterator<Item = &'a Chapter>,
    {
        let enabled: Vec<&'a Chapter> = chapters.into_iter().filter(|c| c.enabled).collect();

        let volumes: Vec<Volume<'a>> = enabled
            .chunks(self.group_size.get() as usize)
            .zip(self.start_volume.get()..)
            .map(|(group, number)| Volume {
                number,
                chapters: group.to_vec(),
            })
            .collect();

        debug!(
            "Planned {} volume(s) from {} enabled chapter(s) (group size {}, start v{:02})",
            volumes.len(),
            enabled.len(),
            self.group_size,
            self.start_volume
        );

        Plan { volumes }
    }
}
