//! Settlement Benchmarks: Payout Planning and Ledger Round-trips
//!
//! Benchmarks the pure payout planner on large wager books and a full
//! finalize against the in-memory SQLite store.
//!
//! Run with: cargo bench --bench settlement_bench

use std::sync::Arc;

use chrono::{Duration, Utc};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};

use parimutuel_settlement::adapters::metrics::MetricsRegistry;
use parimutuel_settlement::adapters::persistence::LedgerStore;
use parimutuel_settlement::config::AccountsConfig;
use parimutuel_settlement::domain::market::{Outcome, OutcomeSource, Wager};
use parimutuel_settlement::domain::payout::plan_settlement;
use parimutuel_settlement::ports::clock::SystemClock;
use parimutuel_settlement::ports::notifier::NullNotifier;
use parimutuel_settlement::usecases::{
    AccountService, LifecycleController, RetryPolicy, ServiceContext, SettlementEngine,
    WagerService,
};

fn book(size: usize) -> Vec<Wager> {
    (0..size)
        .map(|i| Wager {
            id: i as i64 + 1,
            account_id: (i % 97) as i64 + 1,
            market_id: 1,
            outcome: if i % 3 == 0 { Outcome::Yes } else { Outcome::No },
            amount: (i as i64 * 7919) % 10_000 + 1,
            placed_at: Utc::now(),
        })
        .collect()
}

/// Benchmark payout planning across book sizes.
fn bench_plan_settlement(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan_settlement");
    for size in [10, 1_000, 100_000] {
        let wagers = book(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &wagers, |b, wagers| {
            b.iter(|| plan_settlement(black_box(wagers), black_box(Outcome::Yes)));
        });
    }
    group.finish();
}

/// Benchmark a full finalize (claim, credit, ledger append, commit).
fn bench_finalize(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("finalize_100_wagers", |b| {
        b.iter_batched(
            || {
                rt.block_on(async {
                    let store = LedgerStore::in_memory().await.unwrap();
                    let ctx = ServiceContext::new(
                        store,
                        Arc::new(SystemClock),
                        Arc::new(NullNotifier),
                        Arc::new(MetricsRegistry::new().unwrap()),
                        RetryPolicy::none(),
                    );
                    let settlement = SettlementEngine::new(ctx.clone());
                    let lifecycle = LifecycleController::new(ctx.clone(), settlement.clone());
                    let accounts = AccountService::new(ctx.clone(), &AccountsConfig::default());
                    let wagers = WagerService::new(ctx);

                    let creator = accounts.open_account("creator").await.unwrap().id;
                    let market = lifecycle
                        .create_market(creator, "bench", Utc::now() + Duration::hours(1))
                        .await
                        .unwrap();
                    for i in 0..100 {
                        let id = accounts.open_account("player").await.unwrap().id;
                        let outcome = if i % 2 == 0 { Outcome::Yes } else { Outcome::No };
                        wagers.place_wager(id, market.id, outcome, 10 + i).await.unwrap();
                    }
                    lifecycle.declare_outcome(market.id, creator, Outcome::Yes).await.unwrap();
                    (settlement, market.id)
                })
            },
            |(settlement, market_id)| {
                rt.block_on(settlement.finalize(market_id, OutcomeSource::Declared))
                    .unwrap()
            },
            BatchSize::PerIteration,
        );
    });
}

criterion_group!(benches, bench_plan_settlement, bench_finalize);
criterion_main!(benches);
