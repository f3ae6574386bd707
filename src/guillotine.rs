use crate::types::{Placement, Rect};

const EPS: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FreeRect {
    pub x: f64,
    pub y: f64,
    pub rect: Rect,
}

impl FreeRect {
    fn right(&self) -> f64 {
        self.x + self.rect.w
    }

    fn bottom(&self) -> f64 {
        self.y + self.rect.h
    }

    fn intersects(&self, other: &FreeRect) -> bool {
        self.x < other.right() - EPS
            && other.x < self.right() - EPS
            && self.y < other.bottom() - EPS
            && other.y < self.bottom() - EPS
    }
}

#[derive(Debug, Clone)]
pub struct GuillotineBin {
    stock: Rect,
    kerf: f64,
    pub free_rects: Vec<FreeRect>,
    pub placements: Vec<Placement>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::enum_variant_names)]
pub enum ScoreStrategy {
    BestAreaFit,
    BestShortSideFit,
    BestLongSideFit,
}

#[derive(Debug, Clone, Copy)]
pub struct ScoredPlacement {
    pub free_idx: usize,
    pub rotated: bool,
    pub score: (f64, f64),
}

impl GuillotineBin {
    pub fn new(stock: Rect, kerf: f64) -> Self {
        Self {
            stock,
            kerf,
            free_rects: vec![FreeRect {
                x: 0.0,
                y: 0.0,
                rect: stock,
            }],
            placements: Vec::new(),
        }
    }

    pub fn with_obstacles(stock: Rect, kerf: f64, obstacles: &[FreeRect]) -> Self {
        let mut bin = Self::new(stock, kerf);
        for obstacle in obstacles {
            bin.carve(*obstacle);
        }
        bin
    }

    pub fn stock(&self) -> Rect {
        self.stock
    }

    fn carve(&mut self, obstacle: FreeRect) {
        let blocked = FreeRect {
            x: obstacle.x - self.kerf,
            y: obstacle.y - self.kerf,
            rect: Rect::new(
                obstacle.rect.w + 2.0 * self.kerf,
                obstacle.rect.h + 2.0 * self.kerf,
            ),
        };

        let mut kept = Vec::with_capacity(self.free_rects.len());
        for free in self.free_rects.drain(..) {
            if !free.intersects(&blocked) {
                kept.push(free);
                continue;
            }
            let left = blocked.x.max(free.x);
            let right = blocked.right().min(free.right());
            let pieces = [
                // Left strip, full height
                (free.x, free.y, left - free.x, free.rect.h),
                // Right strip, full height
                (right, free.y, free.right() - right, free.rect.h),
                // Above, between the strips
                (left, free.y, right - left, blocked.y - free.y),
                // Below, between the strips
                (left, blocked.bottom(), right - left, free.bottom() - blocked.bottom()),
            ];
            for (x, y, w, h) in pieces {
                if w > EPS && h > EPS {
                    kept.push(FreeRect {
                        x,
                        y,
                        rect: Rect::new(w, h),
                    });
                }
            }
        }
        self.free_rects = kept;
    }

    pub fn find_best(
        &self,
        piece: Rect,
        allow_rotate: bool,
        strategy: ScoreStrategy,
    ) -> Option<ScoredPlacement> {
        let orientations = [(piece, false), (piece.rotated(), true)];
        let candidates = orientations
            .iter()
            .take(if allow_rotate { 2 } else { 1 })
            .flat_map(|&(oriented, rotated)| {
                self.free_rects
                    .iter()
                    .enumerate()
                    .filter(move |(_, free)| oriented.fits_in(&free.rect))
                    .map(move |(free_idx, free)| ScoredPlacement {
                        free_idx,
                        rotated,
                        score: Self::score(oriented, free.rect, strategy),
                    })
            });

        let mut best: Option<ScoredPlacement> = None;
        for candidate in candidates {
            if best.is_none_or(|b| candidate.score < b.score) {
                best = Some(candidate);
            }
        }
        best
    }

    fn score(piece: Rect, free: Rect, strategy: ScoreStrategy) -> (f64, f64) {
        let slack_w = free.w - piece.w;
        let slack_h = free.h - piece.h;
        let (short, long) = (slack_w.min(slack_h), slack_w.max(slack_h));
        match strategy {
            ScoreStrategy::BestAreaFit => (free.area() - piece.area(), short),
            ScoreStrategy::BestShortSideFit => (short, long),
            ScoreStrategy::BestLongSideFit => (long, short),
        }
    }

    pub fn place(&mut self, scored: ScoredPlacement, piece: Rect) -> Placement {
        let free = self.free_rects.swap_remove(scored.free_idx);
        let rect = if scored.rotated { piece.rotated() } else { piece };
        let placement = Placement {
            rect,
            x: free.x,
            y: free.y,
            rotated: scored.rotated,
        };

        self.split(free, rect);
        self.placements.push(placement);
        self.merge_free_rects();
        placement
    }

    fn push_free(&mut self, x: f64, y: f64, w: f64, h: f64) {
        if w > EPS && h > EPS {
            self.free_rects.push(FreeRect {
                x,
                y,
                rect: Rect::new(w, h),
            });
        }
    }

    // The leftover piece on the roomier side spans the full free rect.
    fn split(&mut self, free: FreeRect, placed: Rect) {
        let right_x = free.x + placed.w + self.kerf;
        let lower_y = free.y + placed.h + self.kerf;
        let right_w = (free.right() - right_x).max(0.0);
        let lower_h = (free.bottom() - lower_y).max(0.0);

        let right_spans = free.rect.w - placed.w >= free.rect.h - placed.h;
        let (right_h, lower_w) = match (right_w > EPS, lower_h > EPS) {
            (true, true) if right_spans => (free.rect.h, placed.w),
            (true, true) => (placed.h, free.rect.w),
            _ => (free.rect.h, free.rect.w),
        };
        self.push_free(right_x, free.y, right_w, right_h);
        self.push_free(free.x, lower_y, lower_w, lower_h);
    }

    fn merge_free_rects(&mut self) {
        'scan: loop {
            for i in 0..self.free_rects.len() {
                for j in (i + 1)..self.free_rects.len() {
                    if let Some(joined) = Self::try_merge(self.free_rects[i], self.free_rects[j]) {
                        self.free_rects[i] = joined;
                        self.free_rects.swap_remove(j);
                        continue 'scan;
                    }
                }
            }
            break;
        }
    }

    fn try_merge(a: FreeRect, b: FreeRect) -> Option<FreeRect> {
        let same = |p: f64, q: f64| (p - q).abs() < EPS;
        let (first, second) = if a.x + a.y <= b.x + b.y { (a, b) } else { (b, a) };

        let side_by_side = same(first.y, second.y)
            && same(first.rect.h, second.rect.h)
            && same(first.right(), second.x);
        let stacked = same(first.x, second.x)
            && same(first.rect.w, second.rect.w)
            && same(first.bottom(), second.y);

        let rect = if side_by_side {
            Rect::new(first.rect.w + second.rect.w, first.rect.h)
        } else if stacked {
            Rect::new(first.rect.w, first.rect.h + second.rect.h)
        } else {
            return None;
        };
        Some(FreeRect {
            x: first.x,
            y: first.y,
            rect,
        })
    }
}
