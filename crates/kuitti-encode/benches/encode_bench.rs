// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for code page lookup and receipt encoding in the
// kuitti-encode crate.

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use kuitti_core::document::{Align, QrCode, ReceiptDocument, SeparatorStyle, TextBlock};
use kuitti_core::types::{CodePage, ProtocolFamily};
use kuitti_encode::{EncodingTable, encode_receipt};

// ---------------------------------------------------------------------------
// Helper: a realistic restaurant receipt
// ---------------------------------------------------------------------------

/// Header, twenty order lines with Nordic characters, totals, QR and cut.
fn lunch_receipt() -> ReceiptDocument {
    let mut builder = ReceiptDocument::builder()
        .text(
            TextBlock::new("Ravintola Kuitti\n")
                .emphasized()
                .scaled(2, 2)
                .aligned(Align::Center),
        )
        .text(TextBlock::new("Hämeenkatu 1, Tampere\n").aligned(Align::Center))
        .separator(SeparatorStyle::Double);
    for i in 0..20 {
        builder = builder.line(format!("{i:>2} x Päivän keitto          12,50 €"));
    }
    builder
        .separator(SeparatorStyle::Single)
        .text(TextBlock::new("YHTEENSÄ  250,00 €\n").emphasized())
        .qr(QrCode::new("https://example.com/receipt/0f9c2d"))
        .feed(2)
        .cut()
        .build()
        .expect("benchmark document is valid")
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

/// Benchmark single-character lookup across ASCII, table and fallback paths.
fn bench_table_lookup(c: &mut Criterion) {
    let table = EncodingTable::new(CodePage::Cp865);
    let text: String = "Hyvää päivää, Åsa! Ø € 中".repeat(40);

    c.bench_function("encode_str cp865 (1 KiB mixed)", |b| {
        b.iter(|| {
            let mut out = Vec::with_capacity(text.len());
            table.encode_str(black_box(&text), &mut out);
            black_box(out);
        });
    });
}

/// Benchmark encoding a full receipt for both command families.
fn bench_encode_receipt(c: &mut Criterion) {
    let doc = lunch_receipt();

    c.bench_function("encode_receipt escpos", |b| {
        b.iter(|| {
            let bytes = encode_receipt(
                black_box(&doc),
                ProtocolFamily::EscPos,
                EncodingTable::new(CodePage::Cp858),
            );
            assert!(bytes.is_ok());
        });
    });

    c.bench_function("encode_receipt star-line", |b| {
        b.iter(|| {
            let bytes = encode_receipt(
                black_box(&doc),
                ProtocolFamily::StarLine,
                EncodingTable::new(CodePage::Cp858),
            );
            assert!(bytes.is_ok());
        });
    });
}

criterion_group!(benches, bench_table_lookup, bench_encode_receipt);
criterion_main!(benches);
