//! JavaScript run inside every fresh isolate

/// Names the preamble binds on the global object
pub const PREAMBLE_BINDINGS: [&str; 6] = ["np", "pd", "plt", "os", "time", "save_plot"];

/// Host environment installed before the engine baseline is recorded
pub(crate) const BOOTSTRAP_JS: &str = r#"
((globalThis) => {
  const ops = Deno.core.ops;

  const format = (value) => {
    if (typeof value === "string") return value;
    if (value instanceof Error) return value.stack ?? String(value);
    if (typeof value === "function") return `[Function ${value.name || "anonymous"}]`;
    if (value === undefined || typeof value === "symbol" || typeof value === "bigint") {
      return String(value);
    }
    try {
      const text = JSON.stringify(value);
      return text === undefined ? String(value) : text;
    } catch {
      return String(value);
    }
  };

  const writer = (stream) => (...args) =>
    ops.op_codebox_write({ stream, text: args.map(format).join(" ") + "\n" });

  globalThis.console = {
    log: writer("stdout"),
    info: writer("stdout"),
    debug: writer("stdout"),
    warn: writer("stderr"),
    error: writer("stderr"),
  };
  globalThis.print = globalThis.console.log;

  class AssertionError extends Error {
    constructor(message) {
      super(message);
      this.name = "AssertionError";
    }
  }
  globalThis.AssertionError = AssertionError;
  globalThis.assert = (condition, message) => {
    if (!condition) throw new AssertionError(message ?? "assertion failed");
  };
})(globalThis);
"#;

/// Preamble as a function of the required op names
pub(crate) const PREAMBLE_JS: &str = r#"
((required) => {
  const ops = Deno.core.ops;
  for (const name of required) {
    if (typeof ops[name] !== "function") {
      throw new Error(`Host library unavailable: ${name}`);
    }
  }

  const isSeries = (value) => Array.isArray(value) || ArrayBuffer.isView(value);
  const toArray = (values) => Array.from(values ?? [], Number);
  const indices = (values) => Array.from(values, (_, i) => i);
  const elementwise = (fn) => (value) =>
    typeof value === "number" ? fn(value) : toArray(value).map((v) => fn(v));

  const np = {
    pi: Math.PI,
    e: Math.E,
    array: (values) => toArray(values),
    zeros: (n) => new Array(n).fill(0),
    ones: (n) => new Array(n).fill(1),
    arange(start, stop, step = 1) {
      if (stop === undefined) {
        stop = start;
        start = 0;
      }
      if (step === 0) throw new RangeError("arange step must be non-zero");
      const out = [];
      for (let v = start; step > 0 ? v < stop : v > stop; v += step) out.push(v);
      return out;
    },
    linspace(start, stop, num = 50) {
      if (num <= 0) return [];
      if (num === 1) return [start];
      const step = (stop - start) / (num - 1);
      return Array.from({ length: num }, (_, i) => start + step * i);
    },
    sum: (values) => toArray(values).reduce((a, b) => a + b, 0),
    mean(values) {
      const a = toArray(values);
      return a.length ? np.sum(a) / a.length : NaN;
    },
    std(values) {
      const a = toArray(values);
      const m = np.mean(a);
      return Math.sqrt(np.mean(a.map((x) => (x - m) ** 2)));
    },
    min: (values) => Math.min(...toArray(values)),
    max: (values) => Math.max(...toArray(values)),
    cumsum(values) {
      let total = 0;
      return toArray(values).map((x) => (total += x));
    },
    random: {
      rand: (n = 1) => Array.from({ length: n }, () => Math.random()),
      randn: (n = 1) =>
        Array.from({ length: n }, () => {
          const u = 1 - Math.random();
          const v = Math.random();
          return Math.sqrt(-2 * Math.log(u)) * Math.cos(2 * Math.PI * v);
        }),
    },
  };
  for (const name of ["sin", "cos", "tan", "exp", "log", "sqrt", "abs", "floor", "ceil", "round"]) {
    np[name] = elementwise(Math[name]);
  }

  const plot = (command) => ops.op_codebox_plot(command);
  const series = (kind, x, y, opts) => {
    if (y === undefined || (y !== null && !isSeries(y))) {
      opts = y;
      y = x;
      x = indices(y);
    }
    let xs = toArray(x);
    if (xs.some(Number.isNaN)) xs = indices(x);
    return plot({
      op: "plot",
      kind,
      x: xs,
      y: toArray(y),
      label: opts?.label ?? null,
      color: opts?.color ?? null,
      width: opts?.width ?? null,
    });
  };

  const plt = {
    figure(num, opts) {
      const options = num !== null && typeof num === "object" ? num : opts ?? {};
      return plot({
        op: "figure",
        num: typeof num === "number" ? num : null,
        figsize: options.figsize ?? null,
      });
    },
    subplots: (nrows = 1, ncols = 1) => plot({ op: "subplots", nrows, ncols }),
    subplot: (nrows, ncols, index) => plot({ op: "subplot", nrows, ncols, index }),
    plot: (x, y, opts) => series("line", x, y, opts),
    scatter: (x, y, opts) => series("scatter", x, y, opts),
    bar: (x, heights, opts) => series("bar", x, heights, opts),
    hist: (values, bins = 10, opts) =>
      plot({
        op: "hist",
        values: toArray(values),
        bins,
        label: opts?.label ?? null,
        color: opts?.color ?? null,
      }),
    title: (text) => plot({ op: "title", text: String(text) }),
    xlabel: (text) => plot({ op: "xlabel", text: String(text) }),
    ylabel: (text) => plot({ op: "ylabel", text: String(text) }),
    legend: () => plot({ op: "legend" }),
    gcf: () => plot({ op: "gcf" }),
    get_fignums: () => plot({ op: "get_fignums" }),
    clf: () => plot({ op: "clf" }),
    close(target) {
      let resolved = "current";
      if (target === "all") resolved = "all";
      else if (typeof target === "number") resolved = { id: target };
      return plot({ op: "close", target: resolved });
    },
    savefig: (path, opts = {}) =>
      ops.op_codebox_savefig({
        path: String(path),
        format: opts.format ?? null,
        dpi: opts.dpi ?? null,
      }),
    show: () => undefined,
  };

  const fs = (command) => ops.op_codebox_fs(command);
  const os = {
    sep: "/",
    getcwd: () => fs({ op: "scratch_dir" }),
    listdir: (path) => fs({ op: "listdir", path: path ?? null }),
    read_text: (path) => fs({ op: "read_text", path: String(path) }),
    write_text: (path, contents) =>
      fs({ op: "write_text", path: String(path), contents: String(contents) }),
    remove: (path) => fs({ op: "remove", path: String(path) }),
    exists: (path) => fs({ op: "exists", path: String(path) }),
    path: {
      join: (...parts) =>
        parts.map(String).reduce((acc, part) => {
          if (part.startsWith("/") || acc === "") return part;
          return acc.replace(/\/+$/, "") + "/" + part;
        }, ""),
    },
  };

  const parseCell = (cell) => {
    const text = cell.trim();
    const number = Number(text);
    return text !== "" && !Number.isNaN(number) ? number : text;
  };

  // Tables are arrays of row objects keyed by column name
  const pd = {
    read_csv(path) {
      const lines = os.read_text(path).split(/\r?\n/).filter((line) => line.length > 0);
      if (lines.length === 0) return [];
      const header = lines[0].split(",").map((name) => name.trim());
      return lines.slice(1).map((line) => {
        const cells = line.split(",");
        return Object.fromEntries(header.map((name, i) => [name, parseCell(cells[i] ?? "")]));
      });
    },
    to_csv(rows, path) {
      const columns = [...new Set(rows.flatMap((row) => Object.keys(row)))];
      const body = rows.map((row) => columns.map((name) => String(row[name] ?? "")).join(","));
      return os.write_text(path, [columns.join(","), ...body].join("\n") + "\n");
    },
    column: (rows, name) => rows.map((row) => row[name]),
  };

  const time = {
    time: () => Date.now() / 1000,
    sleep: (seconds) => ops.op_codebox_sleep(Number(seconds)),
  };

  // `format` only names the default file; otherwise the extension decides
  const save_plot = (filename = null, format = "png") => {
    const name = filename ?? `plot_${Math.floor(time.time())}.${format}`;
    const filepath = plt.savefig(os.path.join(os.getcwd(), name), {
      dpi: 100,
      format: filename === null ? format : null,
    });
    console.log(`Plot saved to: ${filepath.split("/").pop()}`);
    return filepath;
  };

  Object.assign(globalThis, { np, pd, plt, os, time, save_plot });
})
"#;
