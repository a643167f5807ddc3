use criterion::{criterion_group, criterion_main, Criterion};
use rust_decimal::Decimal;
use sim_core::{CriminalEnterprise, Investment, InvestmentStatus, PlayerId, RecordId, Territory};

fn bench_projection(c: &mut Criterion) {
    let owner = PlayerId::from("bench");
    let enterprises: Vec<CriminalEnterprise> = (0..200)
        .map(|i| CriminalEnterprise {
            id: RecordId(format!("e{i}")),
            owner: owner.clone(),
            name: "Racket".into(),
            production_rate: Decimal::from(i % 17),
        })
        .collect();
    let territories: Vec<Territory> = (0..100)
        .map(|i| Territory {
            id: RecordId(format!("t{i}")),
            controller: Some(owner.clone()),
            name: "Block".into(),
            tax_rate: if i % 3 == 0 { None } else { Some(Decimal::from(i % 9)) },
            value: Some(Decimal::from(25_000 + i * 100)),
        })
        .collect();
    let investments: Vec<Investment> = (0..50)
        .map(|i| Investment {
            id: RecordId(format!("i{i}")),
            player_id: owner.clone(),
            name: "Front".into(),
            daily_return: Decimal::new(123_456 + i, 2),
            status: InvestmentStatus::Active,
        })
        .collect();
    let rates = sim_econ::IncomeRates::default();
    c.bench_function("project_income", |b| {
        b.iter(|| {
            let _ = sim_econ::project_income(&enterprises, &territories, &investments, &rates);
        })
    });
}

criterion_group!(benches, bench_projection);
criterion_main!(benches);
