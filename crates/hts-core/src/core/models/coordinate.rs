use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of addressable rows on the largest supported plate (1536-well).
pub const MAX_HEIGHT: usize = 32;
/// Number of addressable columns on the largest supported plate (1536-well).
pub const MAX_WIDTH: usize = 48;

const ALPHABET_SIZE: usize = 26;

static TABLE: Lazy<CoordinateTable> = Lazy::new(CoordinateTable::build);

static LABEL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z]+)0*(\d+)$").expect("well label pattern is valid"));

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum CoordinateError {
    #[error("Coordinate ({row}, {column}) lies outside the 32x48 plate grid")]
    OutOfRange { row: usize, column: usize },
    #[error("Well label '{0}' does not match the pattern <letters><digits>")]
    MalformedLabel(String),
    #[error("Well label '{0}' does not name a well on the plate grid")]
    UnknownLabel(String),
}

/// Machine address of a well: zero-based row and column.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct Coordinate {
    pub row: usize,
    pub column: usize,
}

impl Coordinate {
    pub fn new(row: usize, column: usize) -> Self {
        Self { row, column }
    }

    pub fn label(&self) -> Result<&'static WellLabel, CoordinateError> {
        to_label(*self)
    }
}

impl FromStr for Coordinate {
    type Err = CoordinateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        to_coordinate(s)
    }
}

/// Human-readable address of a well, e.g. `("B", "2", "7")` for the well printed as `B7`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WellLabel {
    pub row_letters: String,
    pub row_number: String,
    pub column_number: String,
}

impl fmt::Display for WellLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.row_letters, self.column_number)
    }
}

struct CoordinateTable {
    labels: Vec<WellLabel>,
    coordinates: HashMap<(String, String), Coordinate>,
}

impl CoordinateTable {
    fn build() -> Self {
        let mut labels = Vec::with_capacity(MAX_HEIGHT * MAX_WIDTH);
        let mut coordinates = HashMap::with_capacity(MAX_HEIGHT * MAX_WIDTH);

        for row in 0..MAX_HEIGHT {
            let letters = row_letters(row);
            for column in 0..MAX_WIDTH {
                let column_number = (column + 1).to_string();
                coordinates.insert(
                    (letters.clone(), column_number.clone()),
                    Coordinate::new(row, column),
                );
                labels.push(WellLabel {
                    row_letters: letters.clone(),
                    row_number: (row + 1).to_string(),
                    column_number,
                });
            }
        }

        Self {
            labels,
            coordinates,
        }
    }
}

/// Row designator for a zero-based row index in the bijective base-26 sequence
/// `A, B, …, Z, AA, AB, …`.
pub fn row_letters(row: usize) -> String {
    let mut letters = Vec::new();
    let mut remainder = row;
    loop {
        letters.push(char::from(b'A' + (remainder % ALPHABET_SIZE) as u8));
        if remainder < ALPHABET_SIZE {
            break;
        }
        remainder = remainder / ALPHABET_SIZE - 1;
    }
    letters.iter().rev().collect()
}

pub fn to_label(coordinate: Coordinate) -> Result<&'static WellLabel, CoordinateError> {
    if coordinate.row >= MAX_HEIGHT || coordinate.column >= MAX_WIDTH {
        return Err(CoordinateError::OutOfRange {
            row: coordinate.row,
            column: coordinate.column,
        });
    }
    Ok(&TABLE.labels[coordinate.row * MAX_WIDTH + coordinate.column])
}

/// Parses labels such as `A1`, `P24` or the zero-padded `A01`.
pub fn to_coordinate(label: &str) -> Result<Coordinate, CoordinateError> {
    let captures = LABEL_PATTERN
        .captures(label.trim())
        .ok_or_else(|| CoordinateError::MalformedLabel(label.to_string()))?;
    let key = (captures[1].to_string(), captures[2].to_string());
    TABLE
        .coordinates
        .get(&key)
        .copied()
        .ok_or_else(|| CoordinateError::UnknownLabel(label.to_string()))
}

/// Iterates the wells of a `height` x `width` grid in row-major order.
pub fn row_major(height: usize, width: usize) -> impl Iterator<Item = Coordinate> {
    (0..height).flat_map(move |row| (0..width).map(move |column| Coordinate::new(row, column)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_coordinate_round_trips_through_its_label() {
        for coordinate in row_major(MAX_HEIGHT, MAX_WIDTH) {
            let label = to_label(coordinate).unwrap();
            assert_eq!(to_coordinate(&label.to_string()).unwrap(), coordinate);
        }
    }

    #[test]
    fn every_label_round_trips_through_its_coordinate() {
        for row in 0..MAX_HEIGHT {
            for column in 1..=MAX_WIDTH {
                let text = format!("{}{}", row_letters(row), column);
                let coordinate = to_coordinate(&text).unwrap();
                assert_eq!(to_label(coordinate).unwrap().to_string(), text);
            }
        }
    }

    #[test]
    fn label_carries_one_based_row_and_column_numbers() {
        let label = to_label(Coordinate::new(1, 6)).unwrap();
        assert_eq!(label.row_letters, "B");
        assert_eq!(label.row_number, "2");
        assert_eq!(label.column_number, "7");
        assert_eq!(label.to_string(), "B7");
    }

    #[test]
    fn row_letters_follow_bijective_base_26() {
        assert_eq!(row_letters(0), "A");
        assert_eq!(row_letters(25), "Z");
        assert_eq!(row_letters(26), "AA");
        assert_eq!(row_letters(27), "AB");
        assert_eq!(row_letters(31), "AF");
        assert_eq!(row_letters(51), "AZ");
        assert_eq!(row_letters(52), "BA");
    }

    #[test]
    fn zero_padded_columns_are_accepted() {
        assert_eq!(to_coordinate("A01").unwrap(), Coordinate::new(0, 0));
        assert_eq!(to_coordinate("B012").unwrap(), Coordinate::new(1, 11));
        assert_eq!(to_coordinate("AF48").unwrap(), Coordinate::new(31, 47));
    }

    #[test]
    fn out_of_range_coordinates_fail() {
        assert_eq!(
            to_label(Coordinate::new(32, 0)),
            Err(CoordinateError::OutOfRange { row: 32, column: 0 })
        );
        assert_eq!(
            to_label(Coordinate::new(0, 48)),
            Err(CoordinateError::OutOfRange { row: 0, column: 48 })
        );
    }

    #[test]
    fn labels_without_trailing_digits_are_malformed() {
        for text in ["A", "12", "A1B", "", "-1"] {
            assert!(matches!(
                to_coordinate(text),
                Err(CoordinateError::MalformedLabel(_))
            ));
        }
    }

    #[test]
    fn well_formed_labels_off_the_grid_are_unknown() {
        for text in ["AG1", "A49", "A0", "a1", "ZZ1"] {
            assert!(matches!(
                to_coordinate(text),
                Err(CoordinateError::UnknownLabel(_))
            ));
        }
    }

    #[test]
    fn row_major_iterates_rows_first() {
        let order: Vec<_> = row_major(2, 3).collect();
        assert_eq!(order.len(), 6);
        assert_eq!(order[0], Coordinate::new(0, 0));
        assert_eq!(order[2], Coordinate::new(0, 2));
        assert_eq!(order[3], Coordinate::new(1, 0));
    }
}
