//! Shared fixtures for the integration suites
#![allow(dead_code)]

use chrono::{Duration, NaiveDate};
use rota::generator::GeneratorInputs;
use rota::models::{Block, Id, Person, Session};

pub fn d(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

pub fn id(s: &str) -> Id {
    Id::new(s).unwrap()
}

/// AM and PM blocks for `days` consecutive days starting at `start`
pub fn blocks_for_days(start: NaiveDate, days: i64) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut number = 1;
    for day in 0..days {
        for session in [Session::Am, Session::Pm] {
            blocks.push(Block::new(
                id(&format!("b-{day}-{}", session.as_str().to_lowercase())),
                start + Duration::days(day),
                session,
                number,
            ));
            number += 1;
        }
    }
    blocks
}

/// A staffed program: `residents` residents across training years plus two
/// faculty, with AM/PM blocks over `days` days
pub fn staffed_inputs(start: NaiveDate, days: i64, residents: usize) -> GeneratorInputs {
    let mut persons: Vec<Person> = (0..residents)
        .map(|i| {
            Person::resident(
                id(&format!("res-{i}")),
                format!("Resident {i}"),
                1 + (i % 3) as u8,
            )
        })
        .collect();
    persons.push(Person::faculty(id("fac-0"), "Dr. Stone"));
    persons.push(Person::faculty(id("fac-1"), "Dr. Vale"));

    GeneratorInputs {
        persons,
        blocks: blocks_for_days(start, days),
        templates: Vec::new(),
        absences: Vec::new(),
    }
}

/// A program with residents but no faculty at all; supervision shortfalls
/// keep every candidate's score below 1.0
pub fn unsupervised_inputs(start: NaiveDate, days: i64, residents: usize) -> GeneratorInputs {
    let mut inputs = staffed_inputs(start, days, residents);
    inputs.persons.retain(|p| p.is_resident());
    inputs
}
