pub use anyhow::{bail, ensure, format_err, Context as _, Error, Result};
pub use bbox::{prelude::*, HW, TLBR};
pub use derivative::Derivative;
pub use getset::{CopyGetters, Getters};
pub use indexmap::{IndexMap, IndexSet};
pub use itertools::{chain, izip, Itertools as _};
pub use label::{Label, ScoredLabel};
pub use log::{debug, info, warn};
pub use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};
pub use noisy_float::prelude::*;
pub use serde::{Deserialize, Serialize};
pub use std::{
    collections::{HashMap, HashSet},
    fmt,
    fs::{self, File},
    io::{BufRead, BufReader, BufWriter, Write},
    iter,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    str::FromStr,
    sync::{
        atomic::{self, AtomicUsize},
        Arc, Barrier, Mutex,
    },
    time::Instant,
};

unzip_n::unzip_n!(pub 2);
unzip_n::unzip_n!(pub 3);
