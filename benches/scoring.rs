//! Benchmarks for run alignment and agreement scoring

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use prompt_format_eval::dataset::GoldAnswers;
use prompt_format_eval::scoring::{AgreementScorer, AlignedRuns, LabelOverrides};
use prompt_format_eval::{Label, PromptFormat, ResultRow, RunTable};

const LABELS: [Label; 4] = [
    Label::Positive,
    Label::Negative,
    Label::Neutral,
    Label::Unknown,
];

fn create_runs(prompts: usize, runs: usize) -> Vec<RunTable> {
    (0..runs)
        .map(|run| {
            let mut table = RunTable::new();
            for prompt_id in 0..prompts {
                for shot in [0, 1, 3, 5] {
                    for format in PromptFormat::ALL {
                        let label = LABELS[(prompt_id + shot + run) % LABELS.len()];
                        table.push(ResultRow {
                            prompt_id: i64::try_from(prompt_id).unwrap_or(i64::MAX),
                            prompt: format!("sentence {prompt_id}"),
                            shot,
                            format,
                            label,
                            raw_output: format!("Label: {label}"),
                        });
                    }
                }
            }
            table
        })
        .collect()
}

fn benchmark_scoring(c: &mut Criterion) {
    let mut group = c.benchmark_group("agreement_scoring");
    let mut overrides = LabelOverrides::none();
    overrides.add(3, Label::Neutral, Label::Positive);
    overrides.add(5, Label::Neutral, Label::Positive);
    let scorer = AgreementScorer::new(overrides, false);

    for (prompts, runs) in &[(10, 3), (50, 10), (200, 10)] {
        let tables = create_runs(*prompts, *runs);
        let gold = GoldAnswers::Positional(vec![Label::Positive; prompts * 16]);

        group.bench_function(format!("align_{prompts}x{runs}"), |b| {
            b.iter(|| AlignedRuns::align(black_box(&tables)));
        });

        if let Ok(aligned) = AlignedRuns::align(&tables) {
            group.bench_function(format!("accuracy_{prompts}x{runs}"), |b| {
                b.iter(|| scorer.score_accuracy(black_box(&aligned), &gold));
            });
            group.bench_function(format!("reproducibility_{prompts}x{runs}"), |b| {
                b.iter(|| scorer.score_reproducibility(black_box(&aligned)));
            });
        }
    }

    group.finish();
}

criterion_group!(benches, benchmark_scoring);
criterion_main!(benches);
