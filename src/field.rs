use crate::contour::Shape;
use crate::polygon::Outline;
use nalgebra as na;

/// Domain that bounds the motion of every contour of a frame.
#[derive(Debug, Clone)]
pub enum Field {
    /// `[0, width - 1] x [0, height - 1]` in pixel-center coordinates
    Rect { width: usize, height: usize },
    /// Union of polygonal regions of interest
    Roi(Vec<Outline>),
}

impl Field {
    #[inline]
    pub fn rect(width: usize, height: usize) -> Self {
        Field::Rect { width, height }
    }

    pub fn contains(&self, p: na::Point2<f32>) -> bool {
        match self {
            Field::Rect { width, height } => {
                p.x >= 0.0
                    && p.y >= 0.0
                    && p.x <= (*width as f32 - 1.0)
                    && p.y <= (*height as f32 - 1.0)
            }
            Field::Roi(regions) => regions.iter().any(|r| r.contains(p)),
        }
    }

    /// Where a vertex moving from `from` to `to` ends up. Rectangles clamp the
    /// target, a vertex leaving a region of interest stays where it was.
    pub fn clip(&self, from: na::Point2<f32>, to: na::Point2<f32>) -> na::Point2<f32> {
        match self {
            Field::Rect { width, height } => na::Point2::new(
                to.x.clamp(0.0, (*width as f32 - 1.0).max(0.0)),
                to.y.clamp(0.0, (*height as f32 - 1.0).max(0.0)),
            ),
            Field::Roi(_) => {
                if self.contains(to) {
                    to
                } else {
                    from
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Field;
    use crate::polygon::Outline;
    use nalgebra as na;

    #[test]
    fn rect_clamps() {
        let field = Field::rect(10, 5);
        let p = field.clip(na::Point2::new(8.0, 3.0), na::Point2::new(12.0, -1.0));
        assert_eq!(p, na::Point2::new(9.0, 0.0));
        assert!(field.contains(na::Point2::new(9.0, 4.0)));
        assert!(!field.contains(na::Point2::new(9.5, 4.0)));
    }

    #[test]
    fn roi_keeps_previous_position() {
        let roi = Outline::new(vec![
            na::Point2::new(0.0, 0.0),
            na::Point2::new(10.0, 0.0),
            na::Point2::new(10.0, 10.0),
            na::Point2::new(0.0, 10.0),
        ]);
        let field = Field::Roi(vec![roi]);

        let from = na::Point2::new(5.0, 5.0);
        assert_eq!(field.clip(from, na::Point2::new(6.0, 5.0)), na::Point2::new(6.0, 5.0));
        assert_eq!(field.clip(from, na::Point2::new(16.0, 5.0)), from);
    }
}
