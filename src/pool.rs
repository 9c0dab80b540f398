//! Generic bounded worker pool: fan out a batch of inputs across a fixed
//! number of threads and collect results, used by the cache scan (C2) and
//! (indirectly) by any other component that wants parallel I/O without
//! hand-rolling `thread::scope` each time.
use std::thread;
use crossbeam::channel::{unbounded, Sender};


/// Something that can be run across a pool of worker threads: `Item` is
/// one unit of work, `Output` is what each unit produces.
pub(crate) trait Pool
{
	type Item: Send;
	type Output: Send;

	/// Process one item, producing its output. Called from worker
	/// threads, so must not assume thread-locality of anything captured.
	fn work(&self, item: Self::Item) -> Self::Output;

	/// Run `items` across `workers` threads and return every output, in
	/// completion order (not input order — callers that need ordering
	/// should pack an index into `Item`/`Output` themselves).
	fn run(&self, items: Vec<Self::Item>, workers: usize) -> Vec<Self::Output>
			where Self: Sync, Self::Item: 'static
	{
		let workers = workers.max(1);
		let (tx_in, rx_in) = unbounded::<Self::Item>();
		let (tx_out, rx_out): (Sender<Self::Output>, _) = unbounded();

		for item in items
		{ tx_in.send(item).expect("receiver outlives this loop"); }
		drop(tx_in);

		thread::scope(|scope| {
			for _ in 0..workers
			{
				let rx_in = rx_in.clone();
				let tx_out = tx_out.clone();
				scope.spawn(|| {
					while let Ok(item) = rx_in.recv()
					{
						let out = self.work(item);
						if tx_out.send(out).is_err() { break; }
					}
				});
			}
			drop(tx_out);
		});

		rx_out.try_iter().collect()
	}
}


#[cfg(test)]
mod tests
{
	use super::*;

	struct Doubler;
	impl Pool for Doubler
	{
		type Item = i32;
		type Output = i32;
		fn work(&self, item: i32) -> i32 { item * 2 }
	}

	#[test]
	fn runs_all_items()
	{
		let p = Doubler;
		let mut out = p.run(vec![1, 2, 3, 4, 5], 3);
		out.sort();
		assert_eq!(out, vec![2, 4, 6, 8, 10]);
	}

	#[test]
	fn empty_input()
	{
		let p = Doubler;
		let out = p.run(vec![], 4);
		assert!(out.is_empty());
	}

	#[test]
	fn single_worker()
	{
		let p = Doubler;
		let mut out = p.run(vec![10, 20], 1);
		out.sort();
		assert_eq!(out, vec![20, 40]);
	}
}
