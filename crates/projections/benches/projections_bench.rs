use std::sync::Arc;

use common::AggregateId;
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{AddItem, CartService, ItemId, SubmitCart, UserId};
use event_store::InMemoryEventStore;
use projections::{CartProjector, InMemoryCartViewStore, ProjectionProcessor};

/// Populate a store with N carts of 4 events each (created + 2 items + submitted).
async fn populate_store(store: &InMemoryEventStore, n: usize) {
    let service = CartService::new(store.clone());
    for _ in 0..n {
        let cart_id = AggregateId::new();
        let (user_id, tenant_id) = (UserId::new(), AggregateId::new());
        for price in [1000, 250] {
            service
                .add_item(AddItem {
                    cart_id,
                    user_id,
                    tenant_id,
                    item_id: ItemId::new(),
                    name: "Widget".to_string(),
                    price,
                })
                .await
                .unwrap();
        }
        service.submit(SubmitCart::new(cart_id)).await.unwrap();
    }
}

fn bench_rebuild_100_carts(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new();

    rt.block_on(populate_store(&store, 100));

    c.bench_function("projections/rebuild_400_events", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut processor = ProjectionProcessor::new(store.clone());
                processor.register(Arc::new(CartProjector::new(Arc::new(
                    InMemoryCartViewStore::new(),
                ))));
                processor.rebuild().await.unwrap();
            });
        });
    });
}

criterion_group!(benches, bench_rebuild_100_carts);
criterion_main!(benches);
