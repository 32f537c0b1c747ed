use crate::contour::Deformable;
use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Stable handle of a track segment, valid across frames.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentId(pub u32);

/// Split relation: `child` started where `parent` ended.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    pub parent: SegmentId,
    pub child: SegmentId,
}

/// One object followed over time, at most one contour per frame.
#[derive(Debug, Clone)]
pub struct TrackSegment<C> {
    id: SegmentId,
    color: [u8; 3],
    contours: BTreeMap<u32, C>,
}

impl<C> TrackSegment<C> {
    #[inline]
    pub fn id(&self) -> SegmentId {
        self.id
    }

    #[inline]
    pub fn color(&self) -> [u8; 3] {
        self.color
    }

    #[inline]
    pub fn contour(&self, t: u32) -> Option<&C> {
        self.contours.get(&t)
    }

    /// Contours ordered by time.
    #[inline]
    pub fn contours(&self) -> impl Iterator<Item = (u32, &C)> {
        self.contours.iter().map(|(t, c)| (*t, c))
    }

    #[inline]
    pub fn first_frame(&self) -> Option<u32> {
        self.contours.keys().next().copied()
    }

    #[inline]
    pub fn last_frame(&self) -> Option<u32> {
        self.contours.keys().next_back().copied()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.contours.is_empty()
    }
}

/// Exportable view of the track graph.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TrackGraph {
    pub segments: Vec<SegmentInfo>,
    pub links: Vec<Link>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SegmentInfo {
    pub id: SegmentId,
    pub color: [u8; 3],
    pub first_frame: Option<u32>,
    pub last_frame: Option<u32>,
}

/// Every track segment with the split links between them.
#[derive(Debug, Clone)]
pub struct TrackPool<C> {
    segments: BTreeMap<SegmentId, TrackSegment<C>>,
    links: Vec<Link>,
    next_id: u32,
}

impl<C> Default for TrackPool<C> {
    fn default() -> Self {
        Self {
            segments: BTreeMap::new(),
            links: Vec::new(),
            next_id: 1,
        }
    }
}

impl<C: Deformable> TrackPool<C> {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    #[inline]
    pub fn segment(&self, id: SegmentId) -> Option<&TrackSegment<C>> {
        self.segments.get(&id)
    }

    #[inline]
    pub fn segments(&self) -> impl Iterator<Item = &TrackSegment<C>> {
        self.segments.values()
    }

    #[inline]
    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Contours stored for frame `t`, by segment id.
    pub fn at(&self, t: u32) -> impl Iterator<Item = (SegmentId, &C)> {
        self.segments
            .values()
            .filter_map(move |s| s.contour(t).map(|c| (s.id, c)))
    }

    /// Opens a new segment holding `contour` at its own time index.
    pub fn create(&mut self, mut contour: C) -> SegmentId {
        let id = self.open(&mut contour);

        if let Some(segment) = self.segments.get_mut(&id) {
            segment.contours.insert(contour.time(), contour);
        }

        id
    }

    /// Registers an empty segment for `contour` and gives it the segment color.
    fn open(&mut self, contour: &mut C) -> SegmentId {
        let id = SegmentId(self.next_id);
        self.next_id += 1;

        let color = segment_color(id);
        contour.set_color(color);

        self.segments.insert(
            id,
            TrackSegment {
                id,
                color,
                contours: BTreeMap::new(),
            },
        );

        id
    }

    /// Moves the contours of frame `t` out of their segments, ordered by
    /// segment id.
    pub fn take_frame(&mut self, t: u32) -> Vec<(SegmentId, C)> {
        self.segments
            .values_mut()
            .filter_map(|s| s.contours.remove(&t).map(|c| (s.id, c)))
            .collect()
    }

    /// Puts evolved contours back at frame `t`. Contours of detached
    /// segments are dropped.
    pub fn restore(&mut self, t: u32, live: Vec<(SegmentId, C)>) {
        for (id, contour) in live {
            if let Some(segment) = self.segments.get_mut(&id) {
                segment.contours.insert(t, contour);
            }
        }
    }

    /// Removes the contour of `id` at frame `t`. A segment left without
    /// contours is removed together with its links.
    ///
    /// Returns `true` if the segment is gone.
    pub fn detach(&mut self, id: SegmentId, t: u32) -> bool {
        let empty = match self.segments.get_mut(&id) {
            Some(segment) => {
                segment.contours.remove(&t);
                segment.is_empty()
            }
            None => return true,
        };

        if empty {
            self.segments.remove(&id);
            self.links.retain(|l| l.parent != id && l.child != id);
        }

        empty
    }

    /// Retires the contour of `parent` at frame `t` and opens a segment for
    /// each of `children`. Children are linked to the parent only if the
    /// parent segment has a history before `t`.
    ///
    /// The children stay with the caller until they are [`restore`](Self::restore)d.
    pub fn branch(&mut self, parent: SegmentId, t: u32, children: &mut [C]) -> Vec<SegmentId> {
        let survived = !self.detach(parent, t);

        children
            .iter_mut()
            .map(|child| {
                let id = self.open(child);
                if survived {
                    self.links.push(Link { parent, child: id });
                }

                id
            })
            .collect()
    }

    /// Copies every contour of frame `t - 1` to frame `t` where the segment
    /// has no contour at `t` yet. Returns the number of contours copied.
    pub fn advance(&mut self, t: u32) -> usize {
        let prev = match t.checked_sub(1) {
            Some(prev) => prev,
            None => return 0,
        };

        let mut count = 0;
        for segment in self.segments.values_mut() {
            if segment.contours.contains_key(&t) {
                continue;
            }

            if let Some(next) = segment.contours.get(&prev).map(|c| c.next_frame(t)) {
                segment.contours.insert(t, next);
                count += 1;
            }
        }

        count
    }

    pub fn graph(&self) -> TrackGraph {
        TrackGraph {
            segments: self
                .segments
                .values()
                .map(|s| SegmentInfo {
                    id: s.id,
                    color: s.color,
                    first_frame: s.first_frame(),
                    last_frame: s.last_frame(),
                })
                .collect(),
            links: self.links.clone(),
        }
    }
}

/// Well spread, bright colors from the golden ratio hue sequence.
fn segment_color(id: SegmentId) -> [u8; 3] {
    const GOLDEN: f32 = 0.618_034;

    let hue = (id.0 as f32 * GOLDEN).fract() * 6.0;
    let x = 1.0 - ((hue % 2.0) - 1.0).abs();

    let (r, g, b) = match hue as u32 {
        0 => (1.0, x, 0.0),
        1 => (x, 1.0, 0.0),
        2 => (0.0, 1.0, x),
        3 => (0.0, x, 1.0),
        4 => (x, 0.0, 1.0),
        _ => (1.0, 0.0, x),
    };

    let channel = |v: f32| (55.0 + 200.0 * v).round() as u8;

    [channel(r), channel(g), channel(b)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::polygon::Polygon;
    use nalgebra as na;

    fn circle(x: f32, t: u32) -> Polygon {
        Polygon::circle(na::Point2::new(x, 32.0), 6.0, t, &Config::default()).unwrap()
    }

    #[test]
    fn create_assigns_ids_and_colors() {
        let mut pool = TrackPool::new();
        let a = pool.create(circle(10.0, 0));
        let b = pool.create(circle(30.0, 0));

        assert_ne!(a, b);
        assert_eq!(pool.len(), 2);

        let sa = pool.segment(a).unwrap();
        assert_eq!(sa.contour(0).unwrap().color(), sa.color());
        assert_ne!(sa.color(), pool.segment(b).unwrap().color());
        assert_eq!(pool.at(0).count(), 2);
    }

    #[test]
    fn take_and_restore_frame() {
        let mut pool = TrackPool::new();
        let a = pool.create(circle(10.0, 0));
        let b = pool.create(circle(30.0, 0));

        let live = pool.take_frame(0);
        assert_eq!(live.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![a, b]);
        assert_eq!(pool.at(0).count(), 0);
        assert_eq!(pool.len(), 2);

        assert!(pool.detach(b, 0));
        pool.restore(0, live);

        assert_eq!(pool.at(0).map(|(id, _)| id).collect::<Vec<_>>(), vec![a]);
    }

    #[test]
    fn advance_copies_previous_frame() {
        let mut pool = TrackPool::new();
        let a = pool.create(circle(10.0, 0));

        assert_eq!(pool.advance(0), 0);
        assert_eq!(pool.advance(1), 1);
        assert_eq!(pool.advance(1), 0);

        let segment = pool.segment(a).unwrap();
        let times: Vec<u32> = segment.contours().map(|(t, _)| t).collect();
        assert_eq!(times, vec![0, 1]);
        assert_eq!(segment.first_frame(), Some(0));
        assert_eq!(segment.last_frame(), Some(1));
        assert_eq!(segment.contour(1).unwrap().time(), 1);
        assert_eq!(
            segment.contour(1).unwrap().points(),
            segment.contour(0).unwrap().points()
        );
    }

    #[test]
    fn branch_without_history_replaces_root() {
        let mut pool = TrackPool::new();
        let root = pool.create(circle(20.0, 0));
        let _ = pool.take_frame(0);

        let mut kids = vec![circle(10.0, 0), circle(30.0, 0)];
        let children = pool.branch(root, 0, &mut kids);

        assert_eq!(children.len(), 2);
        assert_eq!(kids[0].color(), pool.segment(children[0]).unwrap().color());
        assert!(pool.segment(root).is_none());
        assert!(pool.links().is_empty());
    }

    #[test]
    fn branch_with_history_links_children() {
        let mut pool = TrackPool::new();
        let root = pool.create(circle(20.0, 0));
        pool.advance(1);
        let _ = pool.take_frame(1);

        let mut kids = vec![circle(10.0, 1), circle(30.0, 1)];
        let children = pool.branch(root, 1, &mut kids);
        pool.restore(1, children.iter().copied().zip(kids).collect());

        let parent = pool.segment(root).unwrap();
        assert_eq!(parent.last_frame(), Some(0));
        assert_eq!(
            pool.links(),
            &[
                Link {
                    parent: root,
                    child: children[0]
                },
                Link {
                    parent: root,
                    child: children[1]
                }
            ]
        );

        // pruning a child drops its link
        assert!(pool.detach(children[1], 1));
        assert_eq!(pool.links().len(), 1);

        let graph = pool.graph();
        assert_eq!(graph.segments.len(), 2);
        assert_eq!(graph.links.len(), 1);
        assert_eq!(graph.segments[0].id, root);
        assert_eq!(graph.segments[1].id, children[0]);
        assert_eq!(graph.segments[1].first_frame, Some(1));
    }

    #[test]
    fn colors_are_bright_and_distinct() {
        let colors: Vec<_> = (1..8).map(|i| segment_color(SegmentId(i))).collect();

        for (i, a) in colors.iter().enumerate() {
            assert!(a.iter().any(|c| *c == 255));
            for b in &colors[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
