use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::Utc;
use docproc_core::{FileId, ProcessId};
use docproc_events::{
    FilePersisted, FileProcessed, FileReady, InMemoryEventBus, PipelineCommand, PipelineEvent, ProcessStarted,
    SagaState,
};
use docproc_infra::resilience::Resilience;
use docproc_infra::saga::process_saga::{Decision, decide};
use docproc_infra::saga::{InMemorySagaStore, SagaOrchestrator};
use docproc_processing::{FileMetrics, FileStatus};
use std::sync::Arc;

/// Every event one process produces, in pipeline order.
fn lifecycle(files: usize) -> Vec<PipelineEvent> {
    let process_id = ProcessId::new();
    let names: Vec<String> = (0..files).map(|i| format!("doc-{i}.txt")).collect();
    let ids: Vec<FileId> = (0..files).map(|_| FileId::new()).collect();

    let mut events = vec![PipelineEvent::ProcessStarted(ProcessStarted {
        process_id,
        file_names: names.clone(),
    })];
    for (file_id, file_name) in ids.iter().zip(&names) {
        events.push(PipelineEvent::FileReady(FileReady {
            process_id,
            file_id: *file_id,
            file_name: file_name.clone(),
        }));
    }
    for (file_id, file_name) in ids.iter().zip(&names) {
        events.push(PipelineEvent::FileProcessed(FileProcessed {
            process_id,
            file_id: *file_id,
            file_name: file_name.clone(),
            metrics: FileMetrics {
                word_count: 120,
                line_count: 12,
                character_count: 800,
                top_words: vec!["saga".into(), "rust".into()],
                summary: "Bench.".into(),
            },
        }));
        events.push(PipelineEvent::FilePersisted(FilePersisted {
            process_id,
            file_id: *file_id,
            file_name: file_name.clone(),
            status: FileStatus::Completed,
        }));
    }
    events
}

fn run_decisions(events: &[PipelineEvent]) -> Option<SagaState> {
    let mut state: Option<SagaState> = None;
    for event in events {
        if let Ok(Decision::Apply(step)) = decide(state.as_ref(), event, Utc::now()) {
            state = Some(step.state);
        }
    }
    state
}

fn bench_transition_rules(c: &mut Criterion) {
    let mut group = c.benchmark_group("saga_decide");

    for files in [1usize, 10, 100] {
        let events = lifecycle(files);
        group.throughput(Throughput::Elements(events.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(files), &events, |b, events| {
            b.iter(|| black_box(run_decisions(black_box(events))));
        });
    }

    group.finish();
}

fn bench_orchestrator(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("tokio runtime");
    let mut group = c.benchmark_group("saga_orchestrator");

    for files in [1usize, 10, 100] {
        group.throughput(Throughput::Elements(files as u64));
        group.bench_with_input(BenchmarkId::from_parameter(files), &files, |b, &files| {
            b.iter(|| {
                let events = lifecycle(files);
                rt.block_on(async {
                    let orchestrator = SagaOrchestrator::new(
                        Arc::new(InMemorySagaStore::new()),
                        InMemoryEventBus::<PipelineCommand>::new(),
                        Resilience::default(),
                    );
                    for event in events {
                        let _ = black_box(orchestrator.handle_event(event).await);
                    }
                });
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_transition_rules, bench_orchestrator);
criterion_main!(benches);
