use crate::error::Result;
use rayon::ThreadPoolBuilder;
use std::num::NonZeroUsize;

/// Configuration for the folding pass. The surrounding linker populates this from its
/// command line.
#[derive(Debug)]
pub struct Args {
    /// Number of threads to use. `None` means use all available parallelism.
    pub num_threads: Option<NonZeroUsize>,

    /// Print one line for each class representative and each section folded into it.
    pub print_icf_sections: bool,

    /// Input relocations use the scrambled MIPS64 little-endian `r_info` encoding.
    pub mips64_el: bool,
}

impl Default for Args {
    fn default() -> Self {
        Args {
            num_threads: None,
            print_icf_sections: false,
            mips64_el: false,
        }
    }
}

impl Args {
    /// Sets up the global thread pool based on `num_threads`.
    pub fn setup_thread_pool(&self) -> Result {
        // The pool might be already initialised, suppress the error intentionally.
        let _ = ThreadPoolBuilder::new()
            .num_threads(self.available_threads().get())
            .build_global();
        Ok(())
    }

    pub(crate) fn available_threads(&self) -> NonZeroUsize {
        self.num_threads.unwrap_or_else(|| {
            std::thread::available_parallelism().unwrap_or(NonZeroUsize::new(1).unwrap())
        })
    }
}
