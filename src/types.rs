use serde::{Deserialize, Serialize};

use crate::svg::Element;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub w: f64,
    pub h: f64,
}

impl Rect {
    pub fn new(w: f64, h: f64) -> Self {
        Self { w, h }
    }

    pub fn area(&self) -> f64 {
        self.w * self.h
    }

    pub fn rotated(&self) -> Self {
        Self {
            w: self.h,
            h: self.w,
        }
    }

    pub fn fits_in(&self, other: &Rect) -> bool {
        self.w <= other.w && self.h <= other.h
    }
}

impl std::fmt::Display for Rect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.w, self.h)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub rect: Rect,
    pub x: f64,
    pub y: f64,
    pub rotated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Insufficient,
    Crashed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlacedSheet {
    pub sheet: usize,
    pub shapes: Element,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PackingResult {
    pub sheets: Vec<PlacedSheet>,
    pub placed: usize,
    pub unplaced: usize,
}

impl PackingResult {
    pub fn sheet_count(&self) -> usize {
        self.sheets.len()
    }
}

pub fn artifact_name(material: &str, sheet: usize) -> String {
    format!("{material}_{sheet}")
}
