//! Order book update latency benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use fast_feed::{Book, Decimal, Entry, EntryType, PriceLevel, Side, UpdateAction};

fn tick() -> Decimal {
    Decimal::new(1, -2)
}

fn populated(levels: i64) -> Book {
    let mut book = Book::new("GAZP", 1001, tick(), 50);
    for i in 0..levels {
        book.set_level(Side::Bid, PriceLevel { price: 10000 - i, size: 100 + i }).unwrap();
        book.set_level(Side::Ask, PriceLevel { price: 10001 + i, size: 100 + i }).unwrap();
    }
    book
}

fn bench_new_level(c: &mut Criterion) {
    c.bench_function("book_new_level", |b| {
        let mut book = populated(20);
        let mut size = 0;

        b.iter(|| {
            size += 1;
            book.new_level(Side::Bid, 0, PriceLevel { price: 10001, size }).unwrap();
            book.delete_level(Side::Bid, 0, Some(10001)).unwrap();
        });
    });
}

fn bench_set_level(c: &mut Criterion) {
    c.bench_function("book_set_level", |b| {
        let mut book = populated(20);
        let mut i = 0i64;

        b.iter(|| {
            book.set_level(Side::Ask, PriceLevel { price: 10001 + i % 20, size: i }).unwrap();
            i += 1;
        });
    });
}

fn bench_apply_entry(c: &mut Criterion) {
    c.bench_function("book_apply_entry", |b| {
        let mut book = populated(20);
        let mut size = 0;

        b.iter(|| {
            size += 1;
            let entry = Entry {
                kind: EntryType::Bid,
                action: UpdateAction::Change,
                price: Some(Decimal::new(9995, -2)),
                size,
                level: None,
            };
            book.apply(black_box(&entry)).unwrap();
        });
    });
}

fn bench_best_bid(c: &mut Criterion) {
    let book = populated(50);

    c.bench_function("book_best_bid", |b| b.iter(|| black_box(book.best_bid())));
}

fn bench_spread(c: &mut Criterion) {
    let book = populated(50);

    c.bench_function("book_spread", |b| b.iter(|| black_box(book.spread())));
}

fn bench_depth(c: &mut Criterion) {
    let book = populated(50);

    c.bench_function("book_depth_10", |b| b.iter(|| black_box(book.depth(10))));
}

criterion_group!(
    benches,
    bench_new_level,
    bench_set_level,
    bench_apply_entry,
    bench_best_bid,
    bench_spread,
    bench_depth
);
criterion_main!(benches);
